//! # Audio Module
//!
//! Everything between the raw upload and the model's input: subprocess
//! normalization to the canonical waveform, wav decoding, and voice
//! activity detection.
//!
//! ## Canonical Waveform:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Channels**: Mono (1 channel)
//! - **Filtering**: the configured ffmpeg filter graph (highpass/lowpass +
//!   gain by default)
//!
//! The normalizer is a trait so handler tests can substitute a fake that
//! just copies bytes; nothing in the orchestration path needs the real
//! media tool installed.

pub mod normalize; // ffmpeg subprocess wrapper
pub mod vad;       // energy-based speech span detection
pub mod wave;      // wav file decoding to f32 samples
