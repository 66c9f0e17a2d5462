//! # Configuration Management
//!
//! This module loads all process configuration from the environment once at
//! startup. The configuration is immutable for the lifetime of the process:
//! every request reads the same values, so no locking is needed around it.
//!
//! ## Configuration Priority (highest to lowest):
//! 1. The flat environment variables the service has always used
//!    (MODEL_SIZE, DEVICE, COMPUTE, BEAM_SIZE, BEST_OF, AUDIO_FILTER,
//!    VAD_MIN_SILENCE_MS, VAD_SPEECH_PAD_MS, NO_SPEECH_THRESHOLD, plus
//!    HOST/PORT/UPLOAD_DIR/TMP_DIR)
//! 2. APP_-prefixed variables (APP_SERVER__HOST etc.)
//! 3. Default values (defined in the Default impl)
//!
//! ## Fail-fast contract:
//! Every numeric field must parse and `validate()` must pass before the
//! server binds. A bad BEAM_SIZE aborts startup instead of failing the
//! first request.

use crate::device::DevicePreference;
use crate::transcription::model::{ComputePrecision, ModelSize};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub audio: AudioConfig,
    pub storage: StorageConfig,
}

/// Server-specific configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Recognition model configuration.
///
/// ## Fields:
/// - `size`: Whisper model size ("tiny", "base", "small", "medium", "large-v3")
/// - `device`: compute device target ("cpu", "cuda", "metal", "auto")
/// - `compute`: compute precision ("int8", "int8_float16", "float16", "float32")
/// - `beam_size` / `best_of`: decoding search width; higher is more accurate
///   but slower
/// - `no_speech_threshold`: probability above which a decoded window is
///   treated as silence and dropped (0.0 to 1.0)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub size: String,
    pub device: String,
    pub compute: String,
    pub beam_size: u32,
    pub best_of: u32,
    pub no_speech_threshold: f32,
}

impl ModelConfig {
    /// Resolve the DEVICE string into a concrete candle device.
    pub fn resolve_device(&self) -> Result<candle_core::Device> {
        let preference: DevicePreference = self
            .device
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
        Ok(preference.device())
    }
}

/// Audio preprocessing configuration.
///
/// ## Fields:
/// - `filter`: ffmpeg filter graph applied during normalization. The default
///   highpass/lowpass/volume chain works well for quiet recordings; drop
///   volume to 1.2 if the input is already loud.
/// - `vad_min_silence_ms`: minimum silence gap that splits two speech spans
/// - `vad_speech_pad_ms`: padding added around each detected speech span
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub filter: String,
    pub vad_min_silence_ms: u32,
    pub vad_speech_pad_ms: u32,
}

/// Storage locations for per-request scratch files.
///
/// Both directories are created at startup. Uploaded originals land in
/// `upload_dir`, normalized waveforms in `tmp_dir`; both are deleted after
/// the response unless the caller asks to keep them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub tmp_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            model: ModelConfig {
                size: "medium".to_string(),
                device: "cpu".to_string(),
                compute: "int8".to_string(),
                beam_size: 8,
                best_of: 8,
                no_speech_threshold: 0.6,
            },
            audio: AudioConfig {
                filter: "highpass=f=80,lowpass=f=8000,volume=1.5".to_string(),
                vad_min_silence_ms: 700,
                vad_speech_pad_ms: 250,
            },
            storage: StorageConfig {
                upload_dir: PathBuf::from("uploads"),
                tmp_dir: PathBuf::from("tmp"),
            },
        }
    }
}

/// The flat environment variable names this service reads, paired with the
/// config key each one overrides.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("MODEL_SIZE", "model.size"),
    ("DEVICE", "model.device"),
    ("COMPUTE", "model.compute"),
    ("BEAM_SIZE", "model.beam_size"),
    ("BEST_OF", "model.best_of"),
    ("NO_SPEECH_THRESHOLD", "model.no_speech_threshold"),
    ("AUDIO_FILTER", "audio.filter"),
    ("VAD_MIN_SILENCE_MS", "audio.vad_min_silence_ms"),
    ("VAD_SPEECH_PAD_MS", "audio.vad_speech_pad_ms"),
    ("HOST", "server.host"),
    ("PORT", "server.port"),
    ("UPLOAD_DIR", "storage.upload_dir"),
    ("TMP_DIR", "storage.tmp_dir"),
];

impl AppConfig {
    /// Load configuration from the environment.
    ///
    /// ## Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Apply APP_-prefixed environment variables
    /// 3. Apply the flat service variables (MODEL_SIZE, DEVICE, ...), which
    ///    take precedence over everything else
    ///
    /// Numeric fields are parsed during the final deserialize, so a
    /// non-numeric BEAM_SIZE surfaces as an error here rather than at
    /// request time.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        for (var, key) in ENV_OVERRIDES {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(*key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Checks the invariants the rest of the system relies on:
    /// - port is usable
    /// - model size, device, and compute precision parse into known values
    /// - beam size and best-of are at least 1
    /// - the no-speech threshold is a probability
    /// - the filter graph is non-empty (ffmpeg rejects an empty -af argument)
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        self.model.size.parse::<ModelSize>()?;
        self.model
            .compute
            .parse::<ComputePrecision>()
            .map_err(|e| anyhow::anyhow!(e))?;
        self.model
            .device
            .parse::<DevicePreference>()
            .map_err(|e| anyhow::anyhow!(e))?;

        if self.model.beam_size == 0 {
            return Err(anyhow::anyhow!("BEAM_SIZE must be greater than 0"));
        }

        if self.model.best_of == 0 {
            return Err(anyhow::anyhow!("BEST_OF must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.model.no_speech_threshold) {
            return Err(anyhow::anyhow!(
                "NO_SPEECH_THRESHOLD must be between 0.0 and 1.0, got {}",
                self.model.no_speech_threshold
            ));
        }

        if self.audio.filter.trim().is_empty() {
            return Err(anyhow::anyhow!("AUDIO_FILTER cannot be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.model.size, "medium");
        assert_eq!(config.model.beam_size, 8);
        assert_eq!(config.audio.vad_min_silence_ms, 700);
        assert_eq!(config.storage.upload_dir, PathBuf::from("uploads"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_zero_beam() {
        let mut config = AppConfig::default();
        config.model.beam_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_bad_threshold() {
        let mut config = AppConfig::default();
        config.model.no_speech_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_unknown_model_size() {
        let mut config = AppConfig::default();
        config.model.size = "gigantic".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_empty_filter() {
        let mut config = AppConfig::default();
        config.audio.filter = "  ".to_string();
        assert!(config.validate().is_err());
    }
}
