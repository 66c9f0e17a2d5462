//! # Application State Module
//!
//! Shared state threaded through every HTTP handler.
//!
//! ## What Lives Here:
//! - The validated configuration (immutable after startup)
//! - The audio normalizer capability (ffmpeg in production, a fake in
//!   handler tests)
//! - The lazily loaded speech model behind a `ModelCell`
//! - Request metrics behind an `Arc<RwLock<_>>`
//!
//! ## Concurrency Model:
//! Configuration never changes after startup, so it is cloned into the
//! state without a lock. Metrics use `RwLock` because many requests read
//! while middleware writes. Model loading is serialized by the cell, so
//! state methods can be called from any number of workers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::audio::normalize::{FfmpegNormalizer, Normalizer};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::transcription::engine::TranscriptionEngine;
use crate::transcription::model::{ComputePrecision, ModelSize, SpeechModel, WhisperModel};
use crate::transcription::registry::ModelCell;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,

    /// Converts uploads to 16 kHz mono WAV.
    normalizer: Arc<dyn Normalizer>,

    /// The speech model, loaded on first use and shared afterwards.
    models: Arc<ModelCell>,

    pub metrics: Arc<RwLock<AppMetrics>>,

    pub start_time: Instant,
}

/// Server-wide request metrics.
#[derive(Debug, Clone, Default)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Transcriptions currently in flight.
    pub active_transcriptions: u32,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Per-endpoint counters.
#[derive(Debug, Clone, Default)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Production state: ffmpeg normalization, empty model cell.
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            normalizer: Arc::new(FfmpegNormalizer::new()),
            models: Arc::new(ModelCell::new()),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// State with injected capabilities, for handler tests.
    #[cfg(test)]
    pub fn with_capabilities(
        config: AppConfig,
        normalizer: Arc<dyn Normalizer>,
        model: Arc<dyn SpeechModel>,
    ) -> Self {
        Self {
            config,
            normalizer,
            models: Arc::new(ModelCell::preloaded(model)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    pub fn normalizer(&self) -> Arc<dyn Normalizer> {
        self.normalizer.clone()
    }

    /// Build a transcription engine, loading the model first if needed.
    ///
    /// The first call downloads and initializes the Whisper checkpoint;
    /// later calls reuse it. A failed load is reported to this caller
    /// and retried on the next request.
    pub async fn engine(&self) -> AppResult<TranscriptionEngine> {
        let model_config = self.config.model.clone();
        let model = self
            .models
            .get_or_load(|| async move {
                let size: ModelSize = model_config.size.parse()?;
                let precision: ComputePrecision = model_config.compute.parse()?;
                let device = model_config.resolve_device()?;
                let model = WhisperModel::load(size, device, precision).await?;
                Ok(Arc::new(model) as Arc<dyn SpeechModel>)
            })
            .await
            .map_err(|e| AppError::Transcription(e.to_string()))?;

        Ok(TranscriptionEngine::new(
            model,
            self.config.model.clone(),
            self.config.audio.clone(),
        ))
    }

    pub fn increment_request_count(&self) {
        if let Ok(mut metrics) = self.metrics.write() {
            metrics.request_count += 1;
        }
    }

    pub fn increment_error_count(&self) {
        if let Ok(mut metrics) = self.metrics.write() {
            metrics.error_count += 1;
        }
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        if let Ok(mut metrics) = self.metrics.write() {
            let entry = metrics
                .endpoint_metrics
                .entry(endpoint.to_string())
                .or_default();
            entry.request_count += 1;
            entry.total_duration_ms += duration_ms;
            if is_error {
                entry.error_count += 1;
            }
        }
    }

    /// Mark a transcription as in flight; the guard ends it on drop.
    pub fn begin_transcription(&self) -> TranscriptionGuard {
        if let Ok(mut metrics) = self.metrics.write() {
            metrics.active_transcriptions += 1;
        }
        TranscriptionGuard {
            metrics: self.metrics.clone(),
        }
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Decrements the in-flight transcription counter on drop, so an early
/// return or error cannot leak the count.
pub struct TranscriptionGuard {
    metrics: Arc<RwLock<AppMetrics>>,
}

impl Drop for TranscriptionGuard {
    fn drop(&mut self) {
        if let Ok(mut metrics) = self.metrics.write() {
            metrics.active_transcriptions = metrics.active_transcriptions.saturating_sub(1);
        }
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.request_count as f64
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.error_count as f64 / self.request_count as f64
        }
    }
}
