//! # Transcription Endpoints
//!
//! The two upload endpoints share one pipeline:
//!
//! 1. Drain the multipart "file" field to the upload directory
//! 2. Normalize it to 16 kHz mono WAV via the configured tool
//! 3. Run speech recognition on the normalized waveform
//! 4. Delete both scratch files (unless `keep_files=true`)
//!
//! `/transcribe_clean` additionally runs the Mongolian text cleanup over
//! the result when the request language is Mongolian, keeping the raw
//! text alongside the cleaned version.
//!
//! ## Failure Domains:
//! Each pipeline stage maps to its own `AppError` variant, so a client
//! sending a non-media file sees a 400 with the tool's diagnostic while
//! storage and inference problems stay 500s. Scratch-file deletion is
//! best effort and never fails a request that already has a transcript.

use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::cleanup::{cleanup_transcript, MN_LANG};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::transcription::engine::{Segment, Transcript};

fn default_language() -> String {
    MN_LANG.to_string()
}

fn default_vad() -> bool {
    true
}

/// Query parameters shared by both transcription endpoints.
#[derive(Debug, Deserialize)]
pub struct TranscribeParams {
    /// Language hint passed to the model; empty string means auto-detect.
    #[serde(default = "default_language")]
    pub language: String,

    /// Decode only detected speech spans instead of the whole file.
    #[serde(default = "default_vad")]
    pub vad: bool,

    /// Keep the uploaded original and normalized waveform on disk,
    /// mainly for debugging filter settings.
    #[serde(default)]
    pub keep_files: bool,
}

/// Wire shape of a successful transcription.
#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub language: String,
    pub duration: f64,
    pub text: String,
    pub segments: Vec<Segment>,

    /// Original model output, present only when cleanup rewrote `text`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_raw: Option<String>,
}

/// POST /transcribe: upload audio, get the raw transcript back.
pub async fn transcribe(
    state: web::Data<AppState>,
    params: web::Query<TranscribeParams>,
    payload: Multipart,
) -> AppResult<HttpResponse> {
    let transcript = run_pipeline(&state, payload, &params).await?;

    Ok(HttpResponse::Ok().json(TranscriptResponse {
        language: transcript.language,
        duration: transcript.duration,
        text: transcript.text,
        segments: transcript.segments,
        text_raw: None,
    }))
}

/// POST /transcribe_clean: like `/transcribe`, plus rule-based Mongolian
/// text cleanup when the request language is Mongolian. Other languages
/// pass through untouched. Scratch files are always deleted here;
/// `keep_files` only applies to the raw endpoint.
pub async fn transcribe_clean(
    state: web::Data<AppState>,
    params: web::Query<TranscribeParams>,
    payload: Multipart,
) -> AppResult<HttpResponse> {
    let params = TranscribeParams {
        language: params.language.clone(),
        vad: params.vad,
        keep_files: false,
    };
    let transcript = run_pipeline(&state, payload, &params).await?;

    let response = if params.language == MN_LANG {
        let cleaned_segments = transcript
            .segments
            .into_iter()
            .map(|s| Segment {
                start: s.start,
                end: s.end,
                text: cleanup_transcript(&s.text),
            })
            .collect();
        TranscriptResponse {
            language: transcript.language,
            duration: transcript.duration,
            text: cleanup_transcript(&transcript.text),
            segments: cleaned_segments,
            text_raw: Some(transcript.text),
        }
    } else {
        TranscriptResponse {
            language: transcript.language,
            duration: transcript.duration,
            text: transcript.text,
            segments: transcript.segments,
            text_raw: None,
        }
    };

    Ok(HttpResponse::Ok().json(response))
}

/// Save, normalize, transcribe, then clean up scratch files.
async fn run_pipeline(
    state: &AppState,
    payload: Multipart,
    params: &TranscribeParams,
) -> AppResult<Transcript> {
    let (upload_path, wav_path) = save_upload(state, payload).await?;

    let result = normalize_and_transcribe(state, &upload_path, &wav_path, params).await;

    if params.keep_files {
        tracing::debug!(
            upload = %upload_path.display(),
            wav = %wav_path.display(),
            "keeping scratch files"
        );
    } else {
        remove_quietly(&upload_path).await;
        remove_quietly(&wav_path).await;
    }

    result
}

async fn normalize_and_transcribe(
    state: &AppState,
    upload_path: &Path,
    wav_path: &Path,
    params: &TranscribeParams,
) -> AppResult<Transcript> {
    state
        .normalizer()
        .normalize(upload_path, wav_path, &state.config.audio.filter)
        .await?;

    let engine = state.engine().await?;
    let _guard = state.begin_transcription();
    engine
        .transcribe(wav_path, &params.language, params.vad)
        .await
        .map_err(|e| AppError::Transcription(e.to_string()))
}

/// Drain the multipart "file" field to the upload directory.
///
/// Returns the stored upload path and the path the normalized waveform
/// will be written to. Every request gets its own UUID so concurrent
/// uploads of the same filename never collide.
async fn save_upload(state: &AppState, mut payload: Multipart) -> AppResult<(PathBuf, PathBuf)> {
    let request_id = Uuid::new_v4().simple().to_string();

    while let Some(item) = payload.next().await {
        let mut field: Field =
            item.map_err(|e| AppError::Storage(format!("multipart error: {}", e)))?;

        let Some(content_disposition) = field.content_disposition() else {
            continue;
        };
        if content_disposition.get_name() != Some("file") {
            continue;
        }
        let client_name = sanitize_filename(content_disposition.get_filename());

        let upload_path = state
            .config
            .storage
            .upload_dir
            .join(format!("{}_{}", request_id, client_name));
        let wav_path = state
            .config
            .storage
            .tmp_dir
            .join(format!("{}.wav", request_id));

        let mut file = tokio::fs::File::create(&upload_path)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| AppError::Storage(format!("upload read: {}", e)))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| AppError::Storage(e.to_string()))?;
        }
        file.flush()
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;

        return Ok((upload_path, wav_path));
    }

    Err(AppError::Storage("no file part in upload".to_string()))
}

/// Reduce a client-supplied filename to its final path component, so a
/// name like `../../etc/passwd` cannot escape the upload directory.
fn sanitize_filename(raw: Option<&str>) -> String {
    raw.and_then(|name| Path::new(name).file_name())
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .map(|name| name.to_string())
        .unwrap_or_else(|| "audio".to_string())
}

/// Best-effort scratch file removal. A file that cannot be deleted never
/// fails a request that already has a transcript.
async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::debug!(path = %path.display(), error = %e, "scratch file not removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::normalize::{NormalizationError, Normalizer};
    use crate::config::AppConfig;
    use crate::transcription::model::{
        DecodeOptions, ModelSegment, SpeechModel, TranscriptInfo,
    };
    use actix_web::{test, App};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct FakeNormalizer {
        fail: bool,
    }

    #[async_trait]
    impl Normalizer for FakeNormalizer {
        async fn normalize(
            &self,
            _input: &Path,
            output: &Path,
            _filter_graph: &str,
        ) -> Result<(), NormalizationError> {
            if self.fail {
                return Err(NormalizationError::new("Invalid data found when processing input"));
            }
            std::fs::write(output, b"fake wav").map_err(|e| NormalizationError::new(e.to_string()))
        }
    }

    struct FakeModel {
        language: String,
        segments: Vec<ModelSegment>,
    }

    impl SpeechModel for FakeModel {
        fn transcribe_file(
            &self,
            _wav_path: &Path,
            options: &DecodeOptions,
        ) -> anyhow::Result<(TranscriptInfo, Vec<ModelSegment>)> {
            let language = options
                .language
                .clone()
                .unwrap_or_else(|| self.language.clone());
            Ok((
                TranscriptInfo {
                    language,
                    duration: 2.5,
                },
                self.segments.clone(),
            ))
        }
    }

    fn test_state(
        dir: &tempfile::TempDir,
        normalizer_fails: bool,
        segments: Vec<ModelSegment>,
    ) -> AppState {
        let mut config = AppConfig::default();
        config.storage.upload_dir = dir.path().join("uploads");
        config.storage.tmp_dir = dir.path().join("tmp");
        std::fs::create_dir_all(&config.storage.upload_dir).unwrap();
        std::fs::create_dir_all(&config.storage.tmp_dir).unwrap();

        AppState::with_capabilities(
            config,
            Arc::new(FakeNormalizer {
                fail: normalizer_fails,
            }),
            Arc::new(FakeModel {
                language: "mn".to_string(),
                segments,
            }),
        )
    }

    fn multipart_request(uri: &str, filename: &str, bytes: &[u8]) -> test::TestRequest {
        let boundary = "----asrtestboundary";
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

        test::TestRequest::post()
            .uri(uri)
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={}", boundary),
            ))
            .set_payload(body)
    }

    fn mn_segments() -> Vec<ModelSegment> {
        vec![
            ModelSegment {
                start: 0.001,
                end: 1.004,
                text: " сайн байна уу ".to_string(),
            },
            ModelSegment {
                start: 1.2,
                end: 2.0,
                text: "   ".to_string(),
            },
        ]
    }

    macro_rules! test_app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .route("/transcribe", web::post().to(transcribe))
                    .route("/transcribe_clean", web::post().to(transcribe_clean)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_transcribe_success_shape() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app!(test_state(&dir, false, mn_segments()));

        let req = multipart_request("/transcribe", "greeting.m4a", b"pretend audio").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["language"], "mn");
        assert_eq!(body["duration"], 2.5);
        assert_eq!(body["text"], "сайн байна уу");
        assert_eq!(body["segments"].as_array().unwrap().len(), 1);
        assert_eq!(body["segments"][0]["start"], 0.0);
        assert_eq!(body["segments"][0]["end"], 1.0);
        assert!(body.get("text_raw").is_none());
    }

    #[actix_web::test]
    async fn test_scratch_files_removed_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, false, mn_segments());
        let upload_dir = state.config.storage.upload_dir.clone();
        let tmp_dir = state.config.storage.tmp_dir.clone();
        let app = test_app!(state);

        let req = multipart_request("/transcribe", "a.mp3", b"bytes").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        assert_eq!(std::fs::read_dir(&upload_dir).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(&tmp_dir).unwrap().count(), 0);
    }

    #[actix_web::test]
    async fn test_keep_files_preserves_scratch_files() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, false, mn_segments());
        let upload_dir = state.config.storage.upload_dir.clone();
        let tmp_dir = state.config.storage.tmp_dir.clone();
        let app = test_app!(state);

        let req =
            multipart_request("/transcribe?keep_files=true", "a.mp3", b"bytes").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        assert_eq!(std::fs::read_dir(&upload_dir).unwrap().count(), 1);
        assert_eq!(std::fs::read_dir(&tmp_dir).unwrap().count(), 1);
    }

    #[actix_web::test]
    async fn test_normalization_failure_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app!(test_state(&dir, true, Vec::new()));

        let req = multipart_request("/transcribe", "junk.txt", b"not audio").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        let message = body["error"].as_str().unwrap();
        assert!(message.starts_with("ffmpeg failed:"), "got: {}", message);
    }

    #[actix_web::test]
    async fn test_missing_file_part_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app!(test_state(&dir, false, Vec::new()));

        let boundary = "----asrtestboundary";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nhello\r\n--{b}--\r\n",
            b = boundary
        );
        let req = test::TestRequest::post()
            .uri("/transcribe")
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={}", boundary),
            ))
            .set_payload(body)
            .to_request();

        let resp = test::call_service(&app, req).await;
        assert_eq!(
            resp.status(),
            actix_web::http::StatusCode::INTERNAL_SERVER_ERROR
        );
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().starts_with("save failed:"));
    }

    #[actix_web::test]
    async fn test_clean_endpoint_rewrites_mongolian_text() {
        let dir = tempfile::tempdir().unwrap();
        let segments = vec![ModelSegment {
            start: 0.0,
            end: 1.0,
            text: "би сансаха дуртай".to_string(),
        }];
        let app = test_app!(test_state(&dir, false, segments));

        let req = multipart_request("/transcribe_clean", "a.wav", b"bytes").to_request();
        let body: serde_json::Value =
            test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["text"], "би сонсоха дуртай");
        assert_eq!(body["text_raw"], "би сансаха дуртай");
        assert_eq!(body["segments"][0]["text"], "би сонсоха дуртай");
    }

    #[actix_web::test]
    async fn test_clean_endpoint_passes_other_languages_through() {
        let dir = tempfile::tempdir().unwrap();
        let segments = vec![ModelSegment {
            start: 0.0,
            end: 1.0,
            text: "hello there".to_string(),
        }];
        let app = test_app!(test_state(&dir, false, segments));

        let req = multipart_request("/transcribe_clean?language=en", "a.wav", b"bytes").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["language"], "en");
        assert_eq!(body["text"], "hello there");
        assert!(body.get("text_raw").is_none());
    }

    #[::core::prelude::v1::test]
    fn test_sanitize_filename_strips_directories() {
        assert_eq!(sanitize_filename(Some("../../etc/passwd")), "passwd");
        assert_eq!(sanitize_filename(Some("voice.m4a")), "voice.m4a");
        assert_eq!(sanitize_filename(Some("")), "audio");
        assert_eq!(sanitize_filename(None), "audio");
    }
}
