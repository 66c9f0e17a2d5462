//! # Transcription Module
//!
//! Speech-to-text via Whisper models running on the Candle-rs framework.
//!
//! ## Key Components:
//! - **Model capability** (`model`): the `SpeechModel` trait plus the
//!   Candle-backed `WhisperModel` implementation
//! - **Model registry** (`registry`): the once-initialized shared model
//!   handle, constructed lazily on first use
//! - **Orchestrator** (`engine`): drives a model invocation for one
//!   request and shapes its output into the wire transcript
//!
//! The trait seam exists so the orchestrator and the HTTP layer can be
//! tested with a fake model returning canned segments; nothing above
//! `model.rs` knows it is talking to Candle.

pub mod engine;   // request orchestration over a loaded model
pub mod model;    // model capability and Candle implementation
pub mod registry; // lazy shared model handle

pub use engine::{Segment, Transcript, TranscriptionEngine};
pub use model::{DecodeOptions, ModelSegment, SpeechModel, TranscriptInfo, VadOptions};
pub use registry::ModelCell;
