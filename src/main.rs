//! # Mongolian ASR Backend - Main Application Entry Point
//!
//! HTTP service turning uploaded audio into Mongolian text. Uploads are
//! normalized to 16 kHz mono WAV with ffmpeg, transcribed by a Whisper
//! model running on Candle, and optionally post-processed by a
//! rule-based Mongolian text cleanup.
//!
//! ## Application Architecture:
//! - **config**: environment-driven configuration (config.rs)
//! - **state**: shared state and request metrics (state.rs)
//! - **audio**: ffmpeg normalization, WAV reading, energy VAD (audio/)
//! - **transcription**: the speech model, its registry, and the
//!   per-request engine (transcription/)
//! - **cleanup**: Mongolian transcript cleanup rules (cleanup.rs)
//! - **handlers**: the upload endpoints (handlers/)
//! - **health** / **middleware**: probes and request observation

mod audio;         // ffmpeg normalization, wav reading, VAD (audio/ directory)
mod cleanup;       // Mongolian transcript cleanup (cleanup.rs)
mod config;        // Configuration management (config.rs)
mod device;        // Compute device selection (device.rs)
mod error;         // Error handling types (error.rs)
mod handlers;      // HTTP request handlers (handlers/ directory)
mod health;        // Health and metrics endpoints (health.rs)
mod middleware;    // Request observation middleware (middleware/ directory)
mod state;         // Application state management (state.rs)
mod transcription; // Speech recognition (transcription/ directory)

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown flag set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## Startup Sequence:
/// 1. Load `.env` and initialize tracing
/// 2. Load and validate configuration (bad settings abort here, not on
///    the first request)
/// 3. Create the storage directories and shared state
/// 4. Start the HTTP server and wait for it to finish or for a
///    shutdown signal
///
/// The speech model is NOT loaded here; the first transcription request
/// triggers the download and initialization so the service becomes
/// reachable immediately.
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting mn-asr-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Model: {} on {} ({}), beam_size={}, best_of={}",
        config.model.size,
        config.model.device,
        config.model.compute,
        config.model.beam_size,
        config.model.best_of
    );

    tokio::fs::create_dir_all(&config.storage.upload_dir).await?;
    tokio::fs::create_dir_all(&config.storage.tmp_dir).await?;

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::RequestObserver)
            .route("/transcribe", web::post().to(handlers::transcribe))
            .route("/transcribe_clean", web::post().to(handlers::transcribe_clean))
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize tracing with console output.
///
/// `RUST_LOG` controls verbosity; without it, application debug logs and
/// actix request logs are shown.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mn_asr_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM/SIGINT and set the shutdown flag, letting in-flight
/// transcriptions finish before the server stops.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}
