//! # HTTP Handlers
//!
//! Request handlers for the transcription endpoints. Health and metrics
//! live in the top-level `health` module; everything upload-related is
//! here.

pub mod transcribe;

pub use transcribe::{transcribe, transcribe_clean};
