//! # Transcription Engine
//!
//! Drives a single transcription request over a loaded model.
//!
//! ## Responsibilities:
//! - Translate the configured model/audio settings plus the request's
//!   language and VAD choices into `DecodeOptions`
//! - Attach the Mongolian guiding prompt when the request is Mongolian
//! - Run the model on the blocking pool (inference is CPU-bound)
//! - Shape the raw model segments into the wire transcript: trim
//!   whitespace, drop empty segments, round times to two decimals, and
//!   join segment texts with single spaces
//!
//! The engine is cheap to construct; handlers build one per request
//! from the shared model handle.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::cleanup::{MN_LANG, MN_PROMPT};
use crate::config::{AudioConfig, ModelConfig};
use crate::transcription::model::{DecodeOptions, SpeechModel, VadOptions};

/// One transcript segment as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// A completed transcription.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transcript {
    pub language: String,
    pub duration: f64,
    pub text: String,
    pub segments: Vec<Segment>,
}

/// Runs one request against a loaded speech model.
pub struct TranscriptionEngine {
    model: Arc<dyn SpeechModel>,
    model_config: ModelConfig,
    audio_config: AudioConfig,
}

impl TranscriptionEngine {
    pub fn new(
        model: Arc<dyn SpeechModel>,
        model_config: ModelConfig,
        audio_config: AudioConfig,
    ) -> Self {
        Self {
            model,
            model_config,
            audio_config,
        }
    }

    /// Transcribe a normalized 16 kHz mono WAV file.
    ///
    /// An empty `language` leaves language selection to the model. VAD
    /// parameters come from the audio configuration and are only passed
    /// through when the request enables VAD.
    pub async fn transcribe(
        &self,
        wav_path: &Path,
        language: &str,
        vad_enabled: bool,
    ) -> Result<Transcript> {
        let options = DecodeOptions {
            language: (!language.is_empty()).then(|| language.to_string()),
            beam_size: self.model_config.beam_size,
            best_of: self.model_config.best_of,
            temperature: 0.0,
            condition_on_previous_text: true,
            initial_prompt: (language == MN_LANG).then(|| MN_PROMPT.to_string()),
            no_speech_threshold: self.model_config.no_speech_threshold,
            vad: vad_enabled.then(|| VadOptions {
                min_silence_ms: self.audio_config.vad_min_silence_ms,
                speech_pad_ms: self.audio_config.vad_speech_pad_ms,
            }),
        };

        let model = self.model.clone();
        let wav_path = wav_path.to_path_buf();
        let (info, raw_segments) =
            tokio::task::spawn_blocking(move || model.transcribe_file(&wav_path, &options))
                .await??;

        let mut segments = Vec::with_capacity(raw_segments.len());
        for raw in raw_segments {
            let text = raw.text.trim();
            if text.is_empty() {
                continue;
            }
            segments.push(Segment {
                start: round2(raw.start),
                end: round2(raw.end),
                text: text.to_string(),
            });
        }

        let text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        Ok(Transcript {
            language: info.language,
            duration: round2(info.duration),
            text,
            segments,
        })
    }
}

/// Round to two decimal places, the resolution of reported timestamps.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::model::{ModelSegment, TranscriptInfo};
    use std::sync::Mutex;

    /// Records the options it was called with and returns canned output.
    struct FakeModel {
        info: TranscriptInfo,
        segments: Vec<ModelSegment>,
        seen_options: Mutex<Vec<DecodeOptions>>,
    }

    impl FakeModel {
        fn new(language: &str, duration: f64, segments: Vec<ModelSegment>) -> Self {
            Self {
                info: TranscriptInfo {
                    language: language.to_string(),
                    duration,
                },
                segments,
                seen_options: Mutex::new(Vec::new()),
            }
        }
    }

    impl SpeechModel for FakeModel {
        fn transcribe_file(
            &self,
            _wav_path: &Path,
            options: &DecodeOptions,
        ) -> Result<(TranscriptInfo, Vec<ModelSegment>)> {
            self.seen_options.lock().unwrap().push(options.clone());
            Ok((self.info.clone(), self.segments.clone()))
        }
    }

    fn engine_with(model: Arc<FakeModel>) -> TranscriptionEngine {
        let config = crate::config::AppConfig::default();
        TranscriptionEngine::new(model, config.model, config.audio)
    }

    #[tokio::test]
    async fn test_segments_are_trimmed_filtered_and_rounded() {
        let model = Arc::new(FakeModel::new(
            "mn",
            2.0,
            vec![
                ModelSegment {
                    start: 0.001,
                    end: 1.004,
                    text: " hi ".to_string(),
                },
                ModelSegment {
                    start: 1.2,
                    end: 2.0,
                    text: "   ".to_string(),
                },
            ],
        ));
        let engine = engine_with(model.clone());

        let transcript = engine.transcribe(Path::new("x.wav"), "mn", true).await.unwrap();

        assert_eq!(transcript.segments.len(), 1);
        assert_eq!(transcript.segments[0].start, 0.0);
        assert_eq!(transcript.segments[0].end, 1.0);
        assert_eq!(transcript.segments[0].text, "hi");
        assert_eq!(transcript.text, "hi");
        assert_eq!(transcript.language, "mn");
        assert_eq!(transcript.duration, 2.0);
    }

    #[tokio::test]
    async fn test_text_joins_segments_with_single_spaces() {
        let model = Arc::new(FakeModel::new(
            "mn",
            3.0,
            vec![
                ModelSegment {
                    start: 0.0,
                    end: 1.0,
                    text: "сайн".to_string(),
                },
                ModelSegment {
                    start: 1.0,
                    end: 2.0,
                    text: " байна уу ".to_string(),
                },
            ],
        ));
        let engine = engine_with(model);

        let transcript = engine.transcribe(Path::new("x.wav"), "mn", true).await.unwrap();
        assert_eq!(transcript.text, "сайн байна уу");
    }

    #[tokio::test]
    async fn test_mongolian_requests_carry_the_guiding_prompt() {
        let model = Arc::new(FakeModel::new("mn", 1.0, Vec::new()));
        let engine = engine_with(model.clone());

        engine.transcribe(Path::new("x.wav"), "mn", true).await.unwrap();

        let seen = model.seen_options.lock().unwrap();
        assert_eq!(seen[0].language.as_deref(), Some("mn"));
        assert_eq!(seen[0].initial_prompt.as_deref(), Some(MN_PROMPT));
        assert!(seen[0].vad.is_some());
        assert_eq!(seen[0].temperature, 0.0);
        assert!(seen[0].condition_on_previous_text);
    }

    #[tokio::test]
    async fn test_other_languages_get_no_prompt() {
        let model = Arc::new(FakeModel::new("en", 1.0, Vec::new()));
        let engine = engine_with(model.clone());

        engine.transcribe(Path::new("x.wav"), "en", false).await.unwrap();

        let seen = model.seen_options.lock().unwrap();
        assert_eq!(seen[0].language.as_deref(), Some("en"));
        assert!(seen[0].initial_prompt.is_none());
        assert!(seen[0].vad.is_none());
    }

    #[tokio::test]
    async fn test_empty_language_hint_is_omitted() {
        let model = Arc::new(FakeModel::new("auto", 1.0, Vec::new()));
        let engine = engine_with(model.clone());

        let transcript = engine.transcribe(Path::new("x.wav"), "", true).await.unwrap();

        let seen = model.seen_options.lock().unwrap();
        assert!(seen[0].language.is_none());
        assert!(seen[0].initial_prompt.is_none());
        assert_eq!(transcript.language, "auto");
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(0.001), 0.0);
        assert_eq!(round2(1.004), 1.0);
        assert_eq!(round2(1.006), 1.01);
        assert_eq!(round2(0.125), 0.13);
    }
}
