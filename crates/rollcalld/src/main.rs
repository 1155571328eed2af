use anyhow::{Context, Result};
use rollcall_core::{Clock, Ledger, SystemClock, YoloDetector, YoloOptions};
use rollcall_hw::{Camera, FrameSource};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod annotate;
mod config;
mod engine;
mod export;
mod http;
mod notifier;
mod stream;
#[cfg(test)]
mod testutil;

use config::{Config, FrameSourceKind};
use notifier::{BrevoNotifier, Notifier};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        bind = %config.bind,
        frame_source = %config.frame_source,
        deadline = %config.deadline,
        repeat_policy = %config.repeat_policy,
        "configuration loaded"
    );

    let ledger = Arc::new(Ledger::new(config.deadline, config.repeat_policy));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let detector = YoloDetector::load(
        &config.model_path(),
        &config.labels_path(),
        YoloOptions {
            confidence_threshold: config.confidence_threshold,
            iou_threshold: config.iou_threshold,
            ..YoloOptions::default()
        },
    )
    .with_context(|| format!("failed to load detection model from {}", config.model_path()))?;
    let classes = detector.names().len();
    tracing::info!(model = %config.model_path(), classes, "detector loaded");

    let source: Option<Box<dyn FrameSource>> = match config.frame_source {
        FrameSourceKind::Camera => {
            let camera = Camera::open(&config.camera_device)
                .with_context(|| format!("failed to open camera {}", config.camera_device))?;
            tracing::info!(camera = %camera.describe(), "camera opened");
            Some(Box::new(camera))
        }
        FrameSourceKind::Upload => {
            tracing::info!("camera capture disabled; accepting uploaded frames only");
            None
        }
    };
    let camera = source.as_ref().map(|s| s.describe());

    let engine = engine::spawn_engine(engine::EngineParts {
        detector: Box::new(detector),
        source,
        ledger: Arc::clone(&ledger),
        clock: Arc::clone(&clock),
        annotator: annotate::Annotator::new(config.font_path.as_deref(), config.jpeg_quality),
    })?;

    let notifier: Option<Arc<dyn Notifier>> = match BrevoNotifier::from_config(&config.mail)? {
        Some(n) => Some(Arc::new(n)),
        None => {
            tracing::warn!("ROLLCALL_BREVO_API_KEY not set; sending attendance by email is disabled");
            None
        }
    };

    let state = Arc::new(http::AppState {
        ledger,
        engine,
        clock,
        notifier,
        exporter: export::CsvExporter::new(&config.export_dir),
        frame_source: config.frame_source,
        camera,
        classes,
    });

    let server = Arc::new(
        tiny_http::Server::http(config.bind.as_str())
            .map_err(|e| anyhow::anyhow!("failed to bind {}: {e}", config.bind))?,
    );
    let workers = http::serve(state, Arc::clone(&server), config.http_workers)
        .context("failed to start HTTP workers")?;

    tracing::info!(bind = %config.bind, workers = workers.len(), "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    for _ in 0..workers.len() {
        server.unblock();
    }
    tokio::task::spawn_blocking(move || {
        for worker in workers {
            let _ = worker.join();
        }
    })
    .await?;

    Ok(())
}
