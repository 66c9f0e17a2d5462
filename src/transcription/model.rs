//! # Speech Model
//!
//! The `SpeechModel` capability and its Candle-backed Whisper
//! implementation.
//!
//! ## Key Components:
//! - **`SpeechModel`**: the seam between the orchestration layer and a
//!   concrete recognizer. Implementations are synchronous; callers run
//!   them on the blocking pool.
//! - **`WhisperModel`**: loads OpenAI Whisper weights from HuggingFace
//!   and decodes greedily, one 30-second window at a time.
//! - **`DecodeOptions`**: everything a single invocation needs beyond
//!   the audio itself (language hint, prompt, silence gating, VAD).
//!
//! ## Decoding Strategy:
//! Audio is segmented into speech spans (when VAD is requested), each
//! span is cut into 30-second windows, and every window is decoded with
//! the previous windows' tokens as context so sentences survive window
//! boundaries. Windows whose no-speech probability exceeds the
//! configured threshold are dropped and do not pollute the context.

use anyhow::{anyhow, Result};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tokenizers::Tokenizer;

use crate::audio::vad::{self, SpeechSpan};
use crate::audio::wave::{self, SAMPLE_RATE};

/// Samples in one decoding window (30 seconds at 16 kHz).
const WINDOW_SAMPLES: usize = m::CHUNK_LENGTH * SAMPLE_RATE as usize;

/// Most context tokens carried into the next window.
const MAX_PROMPT_TOKENS: usize = 128;

const SOT_PREV_TOKEN: &str = "<|startofprev|>";

/// Which Whisper checkpoint to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    LargeV3,
}

impl ModelSize {
    /// HuggingFace repository holding this checkpoint.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::LargeV3 => "openai/whisper-large-v3",
        }
    }
}

impl FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" | "large-v3" | "large_v3" => Ok(ModelSize::LargeV3),
            other => Err(anyhow!("unknown model size: {}", other)),
        }
    }
}

impl fmt::Display for ModelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::LargeV3 => "large-v3",
        };
        write!(f, "{}", name)
    }
}

/// Requested numeric precision for inference.
///
/// The Candle backend loads safetensors weights as f32 and only narrows
/// to f16 on accelerators; int8 requests are honored at f32, which keeps
/// results identical at the cost of memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputePrecision {
    Int8,
    Int8Float16,
    Float16,
    Float32,
}

impl ComputePrecision {
    pub fn dtype(&self, device: &Device) -> DType {
        match self {
            ComputePrecision::Float16 | ComputePrecision::Int8Float16 if device.is_cuda() => {
                DType::F16
            }
            _ => DType::F32,
        }
    }
}

impl FromStr for ComputePrecision {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "int8" => Ok(ComputePrecision::Int8),
            "int8_float16" => Ok(ComputePrecision::Int8Float16),
            "float16" | "fp16" => Ok(ComputePrecision::Float16),
            "float32" | "fp32" => Ok(ComputePrecision::Float32),
            other => Err(anyhow!("unknown compute precision: {}", other)),
        }
    }
}

impl fmt::Display for ComputePrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComputePrecision::Int8 => "int8",
            ComputePrecision::Int8Float16 => "int8_float16",
            ComputePrecision::Float16 => "float16",
            ComputePrecision::Float32 => "float32",
        };
        write!(f, "{}", name)
    }
}

/// Voice-activity-detection tuning for one invocation.
#[derive(Debug, Clone, Copy)]
pub struct VadOptions {
    pub min_silence_ms: u32,
    pub speech_pad_ms: u32,
}

/// Per-request decoding parameters.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Language hint; `None` lets the model pick.
    pub language: Option<String>,
    pub beam_size: u32,
    pub best_of: u32,
    pub temperature: f64,
    /// Carry decoded tokens forward as context for later windows.
    pub condition_on_previous_text: bool,
    /// Text prepended as context before the first window.
    pub initial_prompt: Option<String>,
    /// Windows whose no-speech probability exceeds this are dropped.
    pub no_speech_threshold: f32,
    /// When set, only detected speech spans are decoded.
    pub vad: Option<VadOptions>,
}

/// One decoded stretch of audio, in seconds from the start of the file.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// File-level facts established during recognition.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptInfo {
    /// Resolved language ("auto" when no hint was given).
    pub language: String,
    /// Audio duration in seconds.
    pub duration: f64,
}

/// A loaded speech recognizer.
///
/// `transcribe_file` is CPU-bound and may take tens of seconds; callers
/// are expected to dispatch it via `spawn_blocking`.
pub trait SpeechModel: Send + Sync {
    fn transcribe_file(
        &self,
        wav_path: &Path,
        options: &DecodeOptions,
    ) -> Result<(TranscriptInfo, Vec<ModelSegment>)>;
}

/// Special-token ids resolved from the tokenizer at load time.
struct SpecialTokens {
    sot: u32,
    eot: u32,
    transcribe: u32,
    no_timestamps: u32,
    sot_prev: Option<u32>,
    no_speech: Option<u32>,
}

/// Whisper speech recognition backed by Candle.
pub struct WhisperModel {
    /// KV caches make decoding stateful, so inference is serialized.
    state: Mutex<m::model::Whisper>,
    config: Config,
    device: Device,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    special: SpecialTokens,
}

impl WhisperModel {
    /// Load a Whisper checkpoint from HuggingFace.
    ///
    /// ## Loading Process:
    /// 1. Create the HuggingFace API client (honoring `HF_TOKEN` and
    ///    `HF_HOME` from the environment)
    /// 2. Download config, tokenizer, and safetensors weights (cached)
    /// 3. Resolve the special tokens this tokenizer uses
    /// 4. Build the mel filter bank and initialize the model weights
    pub async fn load(size: ModelSize, device: Device, precision: ComputePrecision) -> Result<Self> {
        tracing::info!("Loading Whisper {} model...", size);
        let start_time = std::time::Instant::now();

        let api = {
            use hf_hub::api::tokio::ApiBuilder;
            let mut builder = ApiBuilder::new().with_progress(false);
            if let Ok(token) = std::env::var("HF_TOKEN") {
                builder = builder.with_token(Some(token));
            }
            builder
                .build()
                .map_err(|e| anyhow!("Failed to create HuggingFace API client: {}", e))?
        };
        let repo = api.model(size.repo_name().to_string());

        let config_filename = repo
            .get("config.json")
            .await
            .map_err(|e| anyhow!("Failed to download config.json from {}: {}", size.repo_name(), e))?;
        let tokenizer_filename = repo
            .get("tokenizer.json")
            .await
            .map_err(|e| anyhow!("Failed to download tokenizer.json from {}: {}", size.repo_name(), e))?;
        let model_filename = repo
            .get("model.safetensors")
            .await
            .map_err(|e| anyhow!("Failed to download model weights from {}: {}", size.repo_name(), e))?;

        let config: Config = serde_json::from_reader(std::fs::File::open(config_filename)?)?;
        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;

        let dtype = precision.dtype(&device);
        if dtype == DType::F32 && !matches!(precision, ComputePrecision::Float32) {
            tracing::debug!("compute precision {} runs as f32 on {:?}", precision, device);
        }

        let special = SpecialTokens {
            sot: token_id(&tokenizer, m::SOT_TOKEN)?,
            eot: token_id(&tokenizer, m::EOT_TOKEN)?,
            transcribe: token_id(&tokenizer, m::TRANSCRIBE_TOKEN)?,
            no_timestamps: token_id(&tokenizer, m::NO_TIMESTAMPS_TOKEN)?,
            sot_prev: tokenizer.token_to_id(SOT_PREV_TOKEN),
            no_speech: m::NO_SPEECH_TOKENS
                .iter()
                .find_map(|token| tokenizer.token_to_id(token)),
        };

        let n_freqs = m::N_FFT / 2 + 1;
        let mel_filters = mel_filter_bank(n_freqs, config.num_mel_bins);

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[model_filename], dtype, &device)? };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        tracing::info!(
            "Whisper {} model loaded in {:.2}s on {:?}",
            size,
            start_time.elapsed().as_secs_f64(),
            device
        );

        Ok(Self {
            state: Mutex::new(model),
            config,
            device,
            tokenizer,
            mel_filters,
            special,
        })
    }

    /// Token id for a language hint like "mn", if the tokenizer knows it.
    fn language_token(&self, language: &str) -> Option<u32> {
        self.tokenizer.token_to_id(&format!("<|{}|>", language))
    }

    /// Decode one padded 30-second window. Returns the text, the raw
    /// text tokens, and the window's no-speech probability.
    fn decode_window(
        &self,
        model: &mut m::model::Whisper,
        pcm: &[f32],
        options: &DecodeOptions,
        context: &[u32],
    ) -> Result<(String, Vec<u32>, f32)> {
        let mut padded = vec![0f32; WINDOW_SAMPLES];
        let copy_len = pcm.len().min(WINDOW_SAMPLES);
        padded[..copy_len].copy_from_slice(&pcm[..copy_len]);

        let mel = m::audio::pcm_to_mel(&self.config, &padded, &self.mel_filters);
        let n_frames = mel.len() / self.config.num_mel_bins;
        let mel = Tensor::from_vec(mel, (1, self.config.num_mel_bins, n_frames), &self.device)?;
        let audio_features = model.encoder.forward(&mel, true)?;

        let mut tokens: Vec<u32> = Vec::new();
        if !context.is_empty() {
            if let Some(sot_prev) = self.special.sot_prev {
                let keep = context.len().min(MAX_PROMPT_TOKENS);
                tokens.push(sot_prev);
                tokens.extend_from_slice(&context[context.len() - keep..]);
            }
        }
        let sot_index = tokens.len();
        tokens.push(self.special.sot);
        if let Some(lang) = options.language.as_deref().filter(|l| !l.is_empty()) {
            match self.language_token(lang) {
                Some(lang_token) => tokens.push(lang_token),
                None => tracing::warn!("tokenizer has no token for language '{}'", lang),
            }
        }
        tokens.push(self.special.transcribe);
        tokens.push(self.special.no_timestamps);

        let max_tokens = self.config.max_target_positions / 2;
        let mut output_tokens: Vec<u32> = Vec::new();
        let mut no_speech_prob = 0f32;

        for i in 0..max_tokens {
            let token_tensor = Tensor::new(&tokens[..], &self.device)?.unsqueeze(0)?;
            let ys = model.decoder.forward(&token_tensor, &audio_features, i == 0)?;

            if i == 0 {
                if let Some(no_speech) = self.special.no_speech {
                    let sot_logits = model
                        .decoder
                        .final_linear(&ys.i((..1, sot_index..sot_index + 1))?)?
                        .i(0)?
                        .i(0)?;
                    no_speech_prob = candle_nn::ops::softmax(&sot_logits, 0)?
                        .i(no_speech as usize)?
                        .to_scalar::<f32>()?;
                }
            }

            let (_, seq_len, _) = ys.dims3()?;
            let logits = model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?;
            let next_token = logits.argmax(0)?.to_scalar::<u32>()?;

            if next_token == self.special.eot {
                break;
            }
            if is_repetitive(&output_tokens, next_token) {
                break;
            }
            tokens.push(next_token);
            output_tokens.push(next_token);
        }

        let text = self
            .tokenizer
            .decode(&output_tokens, true)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))?;
        Ok((text, output_tokens, no_speech_prob))
    }
}

impl SpeechModel for WhisperModel {
    fn transcribe_file(
        &self,
        wav_path: &Path,
        options: &DecodeOptions,
    ) -> Result<(TranscriptInfo, Vec<ModelSegment>)> {
        let start_time = std::time::Instant::now();
        let samples = wave::read_mono_f32(wav_path)?;
        let duration = samples.len() as f64 / SAMPLE_RATE as f64;

        let spans = match &options.vad {
            Some(v) => vad::detect_speech_spans(&samples, v.min_silence_ms, v.speech_pad_ms),
            None if samples.is_empty() => Vec::new(),
            None => vec![SpeechSpan {
                start: 0,
                end: samples.len(),
            }],
        };

        let mut model = self
            .state
            .lock()
            .map_err(|_| anyhow!("model mutex poisoned"))?;

        let mut context: Vec<u32> = match &options.initial_prompt {
            Some(prompt) => self
                .tokenizer
                .encode(prompt.as_str(), false)
                .map_err(|e| anyhow!("Tokenizer encode error: {}", e))?
                .get_ids()
                .to_vec(),
            None => Vec::new(),
        };

        let mut segments = Vec::new();
        for span in &spans {
            let mut offset = span.start;
            while offset < span.end {
                let window_end = (offset + WINDOW_SAMPLES).min(span.end);
                let (text, output_tokens, no_speech_prob) =
                    self.decode_window(&mut model, &samples[offset..window_end], options, &context)?;

                if no_speech_prob > options.no_speech_threshold {
                    tracing::debug!(
                        "dropping window at {:.2}s, no-speech prob {:.3}",
                        offset as f64 / SAMPLE_RATE as f64,
                        no_speech_prob
                    );
                } else {
                    segments.push(ModelSegment {
                        start: offset as f64 / SAMPLE_RATE as f64,
                        end: window_end as f64 / SAMPLE_RATE as f64,
                        text,
                    });
                    if options.condition_on_previous_text {
                        context.extend_from_slice(&output_tokens);
                        if context.len() > MAX_PROMPT_TOKENS {
                            context.drain(..context.len() - MAX_PROMPT_TOKENS);
                        }
                    }
                }
                offset = window_end;
            }
        }

        let language = options
            .language
            .clone()
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| "auto".to_string());

        tracing::debug!(
            "transcribed {:.2}s of audio ({} segments) in {:.2}s",
            duration,
            segments.len(),
            start_time.elapsed().as_secs_f64()
        );

        Ok((TranscriptInfo { language, duration }, segments))
    }
}

fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| anyhow!("tokenizer has no id for token {}", token))
}

/// Detect degenerate decoding loops: three identical tokens in a row,
/// or the last three tokens repeating the three before them.
fn is_repetitive(tokens: &[u32], new_token: u32) -> bool {
    if tokens.len() >= 2 {
        let n = tokens.len();
        if tokens[n - 1] == new_token && tokens[n - 2] == new_token {
            return true;
        }
    }
    if tokens.len() >= 6 {
        let n = tokens.len();
        if tokens[n - 3..] == tokens[n - 6..n - 3] {
            return true;
        }
    }
    false
}

/// Triangular mel filter bank with Slaney-style area normalization,
/// matching the layout `pcm_to_mel` expects: `n_mels` rows of `n_freqs`
/// FFT-bin weights.
fn mel_filter_bank(n_freqs: usize, n_mels: usize) -> Vec<f32> {
    let f_max = SAMPLE_RATE as f32 / 2.0;
    let hz_to_mel = |f: f32| 2595.0 * (1.0 + f / 700.0).log10();
    let mel_to_hz = |mel: f32| 700.0 * (10f32.powf(mel / 2595.0) - 1.0);

    let mel_max = hz_to_mel(f_max);
    let points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32))
        .collect();

    let freq_step = f_max / (n_freqs - 1) as f32;
    let mut filters = vec![0f32; n_mels * n_freqs];
    for mel_bin in 0..n_mels {
        let (lower, center, upper) = (points[mel_bin], points[mel_bin + 1], points[mel_bin + 2]);
        let norm = 2.0 / (upper - lower);
        for k in 0..n_freqs {
            let freq = k as f32 * freq_step;
            let weight = if freq <= center {
                (freq - lower) / (center - lower)
            } else {
                (upper - freq) / (upper - center)
            };
            if weight > 0.0 {
                filters[mel_bin * n_freqs + k] = weight * norm;
            }
        }
    }
    filters
}
