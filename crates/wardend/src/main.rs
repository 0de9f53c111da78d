use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;
use warden_core::{gallery, ArcFaceEmbedder, GalleryHandle, ScrfdDetector};
use warden_hw::V4lCaptureSource;

mod actuator;
mod audit;
mod config;
mod gate;
mod hub;
mod pipeline;
mod server;
mod source;
mod status;

use actuator::{HttpActuator, LogActuator};
use audit::HttpAuditSink;
use config::Config;
use gate::{DoorGate, GateDriver};
use hub::FrameHub;
use pipeline::{PipelineOptions, RecognitionPipeline};
use server::AppState;
use source::{FrameSource, SourceOptions};
use status::SystemStatus;

#[derive(Parser)]
#[command(name = "wardend", about = "Vision-triggered door access-control daemon")]
struct Cli {
    /// V4L2 device path (overrides WARDEN_CAMERA_DEVICE).
    #[arg(long)]
    device: Option<String>,
    /// HTTP listen address (overrides WARDEN_LISTEN).
    #[arg(long)]
    listen: Option<String>,
    /// Enrollment directory (overrides WARDEN_FACES_DIR).
    #[arg(long)]
    faces_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(device) = cli.device {
        config.camera_device = device;
    }
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if let Some(faces_dir) = cli.faces_dir {
        config.faces_dir = faces_dir;
    }
    let config = Arc::new(config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        device = %config.camera_device,
        listen = %config.listen_addr,
        "wardend starting"
    );

    // Load models and build the initial gallery before anything starts;
    // missing models are fatal, a missing gallery is not.
    let scrfd_path = config.scrfd_model_path();
    let arcface_path = config.arcface_model_path();
    let faces_dir = config.faces_dir.clone();
    type LoadedModels = (
        ScrfdDetector,
        ArcFaceEmbedder,
        warden_core::Gallery,
        warden_core::LoadReport,
    );
    let (detector, embedder, initial_gallery, report) =
        tokio::task::spawn_blocking(move || -> Result<LoadedModels> {
            let mut detector =
                ScrfdDetector::load(&scrfd_path).context("failed to load detection model")?;
            let mut embedder =
                ArcFaceEmbedder::load(&arcface_path).context("failed to load embedding model")?;
            let (gallery, report) =
                gallery::load_directory(&faces_dir, &mut detector, &mut embedder)
                    .context("failed to load identity gallery")?;
            Ok((detector, embedder, gallery, report))
        })
        .await??;

    tracing::info!(
        identities = report.identities,
        embeddings = report.embeddings,
        "identity gallery loaded"
    );
    if initial_gallery.is_empty() {
        tracing::warn!("gallery is empty; every face will be treated as unknown");
    }

    let gallery = GalleryHandle::new(initial_gallery);
    let hub = FrameHub::new();
    let system_status = Arc::new(SystemStatus::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Capture runs on its own thread; device I/O is blocking. A fatal
    // camera error in attended mode takes the whole daemon down.
    let source = FrameSource::new(
        V4lCaptureSource::new(config.camera_device.clone()),
        SourceOptions {
            frame_interval: config.frame_interval,
            open_retry_attempts: config.open_retry_attempts,
            retry_delay: config.retry_delay,
            recovery_pause: config.recovery_pause,
            unattended: config.unattended,
            jpeg_quality: config.jpeg_quality,
        },
        hub.clone(),
        system_status.clone(),
        shutdown_rx.clone(),
    );
    let fatal_tx = shutdown_tx.clone();
    let capture_thread = std::thread::Builder::new()
        .name("warden-capture".to_string())
        .spawn(move || {
            if let Err(e) = source.run() {
                tracing::error!(error = %e, "camera permanently unavailable; shutting down");
                let _ = fatal_tx.send(true);
            }
        })
        .context("failed to spawn capture thread")?;

    let (event_tx, event_rx) = mpsc::channel(8);
    let pipeline = RecognitionPipeline::new(
        detector,
        embedder,
        gallery.clone(),
        hub.subscribe(),
        event_tx,
        PipelineOptions {
            sample_every: config.sample_every,
            downscale_factor: config.downscale_factor,
            tolerance: config.match_tolerance,
        },
        shutdown_rx.clone(),
    );
    let pipeline_task = tokio::spawn(pipeline.run());

    let audit_sink = match &config.audit_url {
        Some(url) => Some(HttpAuditSink::new(url, config.http_timeout)?),
        None => {
            tracing::info!("audit sink disabled (WARDEN_AUDIT_URL unset)");
            None
        }
    };
    let door_gate = DoorGate::new(config.hold_duration, config.cooldown);
    let gate_task = match &config.actuator_url {
        Some(base_url) => {
            let actuator = HttpActuator::new(
                base_url,
                &config.actuator_document,
                config.actuator_auth.as_deref(),
                config.open_position,
                config.close_position,
                config.http_timeout,
            )?;
            tokio::spawn(
                GateDriver::new(door_gate, event_rx, actuator, audit_sink, shutdown_rx.clone())
                    .run(),
            )
        }
        None => {
            tracing::warn!("actuator not configured (WARDEN_ACTUATOR_URL unset); commands are logged only");
            tokio::spawn(
                GateDriver::new(
                    door_gate,
                    event_rx,
                    LogActuator,
                    audit_sink,
                    shutdown_rx.clone(),
                )
                .run(),
            )
        }
    };

    let state = AppState {
        hub: hub.clone(),
        status: system_status.clone(),
        gallery: gallery.clone(),
        config: config.clone(),
    };
    let mut server_task = tokio::spawn(server::serve(
        state,
        config.listen_addr.clone(),
        shutdown_rx.clone(),
    ));

    let mut shutdown_watch = shutdown_rx.clone();
    let mut server_done = false;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
        _ = shutdown_watch.changed() => {
            tracing::info!("internal shutdown requested");
        }
        result = &mut server_task => {
            server_done = true;
            match result {
                Ok(Ok(())) => tracing::info!("HTTP surface exited"),
                Ok(Err(e)) => tracing::error!(error = %e, "HTTP surface failed"),
                Err(e) => tracing::error!(error = %e, "HTTP surface task panicked"),
            }
            let _ = shutdown_tx.send(true);
        }
    }

    let _ = pipeline_task.await;
    let _ = gate_task.await;
    if !server_done {
        match server_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "HTTP surface failed during shutdown"),
            Err(e) => tracing::error!(error = %e, "HTTP surface task panicked"),
        }
    }
    if capture_thread.join().is_err() {
        tracing::error!("capture thread panicked");
    }

    tracing::info!("wardend stopped");
    Ok(())
}
