//! Capture station command-line tool.
//!
//! Monitors stream health, grabs still frames from the stream proxies,
//! controls backend camera processing and runs the guided photo flow against
//! a virtual camera.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use birdieo_shared::{AuthContext, ClothingSummary};
use birdieo_station::capture_view::{CaptureView, CaptureViewOptions};
use birdieo_station::config::{CommonArgs, StationConfig};
use birdieo_station::frame_source::{fetch_views, FrameView};
use birdieo_station::health_monitor::{MonitorSettings, MonitoredSource, StreamHealthMonitor};
use birdieo_station::virtual_backend::{VirtualMediaBackend, VirtualPermissionBackend};
use birdieo_station::{CaptureDevice, FrameCapturer, PermissionGate, PhotoPipeline};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Birdieo capture station")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll stream health and detections until interrupted
    Monitor {
        /// Stop after this many health ticks
        #[arg(long)]
        ticks: Option<u64>,
    },
    /// Save one still frame from every configured stream
    Snapshot {
        /// Directory to write `<source>.jpg` files into
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Backend camera processing control
    Camera {
        #[command(subcommand)]
        action: CameraAction,
    },
    /// Activate recording for a round
    Activate {
        #[arg(long)]
        round: String,
    },
    /// Run the guided photo flow with a virtual camera
    CaptureDemo {
        #[arg(long)]
        round: String,

        #[arg(long, default_value = "1280")]
        width: u32,

        #[arg(long, default_value = "720")]
        height: u32,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum CameraAction {
    Status,
    Start,
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = args.common.resolve().context("Failed to load configuration")?;
    let auth = match &args.common.token {
        Some(token) => AuthContext::bearer(token.clone()),
        None => AuthContext::anonymous(),
    };

    match args.command {
        Command::Monitor { ticks } => {
            let sources = config
                .streams
                .iter()
                .map(MonitoredSource::from_config)
                .collect::<Result<Vec<_>, _>>()
                .context("Invalid stream source URL")?;
            let monitor = StreamHealthMonitor::builder(sources, MonitorSettings::from(&config))
                .camera_status(config.api_client()?)
                .spawn(auth);
            run_monitor(monitor, ticks).await
        }
        Command::Snapshot { out } => run_snapshot(&config, &out).await,
        Command::Camera { action } => {
            let api = config.api_client()?;
            match action {
                CameraAction::Status => {
                    let status = api.camera_status(&auth).await?;
                    info!(
                        "Camera processing active={} clips_created={} last_motion={} stream={}",
                        status.active, status.clips_created, status.last_motion_time, status.stream_url
                    );
                }
                CameraAction::Start => {
                    let response = api.start_camera(&auth).await?;
                    info!("Camera start: {}", response.message);
                }
                CameraAction::Stop => {
                    let response = api.stop_camera(&auth).await?;
                    info!("Camera stop: {}", response.message);
                }
            }
            Ok(())
        }
        Command::Activate { round } => {
            let api = config.api_client()?;
            let response = api
                .activate_round(&auth, &round)
                .await
                .with_context(|| format!("Failed to activate round {round}"))?;
            info!(
                "Round {} {} (camera processing: {})",
                round, response.status, response.camera_processing
            );
            Ok(())
        }
        Command::CaptureDemo {
            round,
            width,
            height,
        } => {
            let media = Arc::new(VirtualMediaBackend::new(width, height));
            let device = Arc::new(CaptureDevice::with_ready_timeout(media, config.ready_timeout()));
            let gate = Arc::new(PermissionGate::new(Arc::new(VirtualPermissionBackend::opaque())));
            let pipeline = Arc::new(PhotoPipeline::new(Arc::new(config.api_client()?)));
            let capturer = Arc::new(FrameCapturer::new(config.jpeg_quality));

            let view = CaptureView::open(device, gate, capturer, pipeline, CaptureViewOptions::from(&config)).await;
            let result = run_guided_flow(&view, &auth, &round).await;
            view.close().await;
            result
        }
    }
}

async fn run_monitor(monitor: StreamHealthMonitor, ticks: Option<u64>) -> Result<()> {
    let mut health = monitor.health();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = health.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let report = health.borrow_and_update().clone();
        for stream in &report.streams {
            match (&stream.error, stream.age_seconds) {
                (Some(error), _) => warn!("[{}] offline: {}", stream.source, error),
                (None, Some(age)) => info!("[{}] online={} age={:.1}s", stream.source, stream.online, age),
                (None, None) => info!("[{}] online={} (no frame yet)", stream.source, stream.online),
            }
        }
        if let Some(camera) = report.camera.as_ref().and_then(|c| c.status.as_ref()) {
            info!("Camera processing active={} clips={}", camera.active, camera.clips_created);
        }
        for (source, frame) in monitor.detections().borrow().iter() {
            info!(
                "[{}] {} detection(s){}",
                source,
                frame.result.len(),
                if frame.demo { " (demo)" } else { "" }
            );
        }

        if ticks.is_some_and(|limit| report.tick >= limit) {
            break;
        }
    }
    monitor.stop().await;
    Ok(())
}

async fn run_snapshot(config: &StationConfig, out: &Path) -> Result<()> {
    std::fs::create_dir_all(out).with_context(|| format!("Failed to create {}", out.display()))?;

    let mut saved = 0;
    for (source, view) in fetch_views(config).await {
        match view {
            Ok(FrameView::Still(frame)) => {
                let path = out.join(format!("{source}.jpg"));
                std::fs::write(&path, &frame.jpeg)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!("[{}] {}x{} frame saved to {}", source, frame.width, frame.height, path.display());
                saved += 1;
            }
            Ok(FrameView::Embedded { url }) => info!("[{}] embedded page, view at {}", source, url),
            Err(e) => warn!("[{}] no frame: {}", source, e),
        }
    }
    info!("Saved {saved} frame(s) from {} source(s)", config.streams.len());
    Ok(())
}

async fn run_guided_flow(view: &CaptureView, auth: &AuthContext, round: &str) -> Result<()> {
    let mut streaming = view.device().streaming();
    streaming
        .wait_for(|s| *s)
        .await
        .context("Camera never started")?;

    let mut state = view.state();
    let mut analyses = Vec::new();
    loop {
        let Some(step) = state.borrow_and_update().step else {
            break;
        };
        info!("Taking {step} photo");
        view.begin_capture();
        let snapshot = state
            .wait_for(|s| s.pending.is_some() || s.last_error.is_some())
            .await?
            .clone();
        if let Some(err) = snapshot.last_error {
            anyhow::bail!("Capture failed: {err} ({})", err.remediation());
        }

        let submission = view.confirm(auth, round).await?;
        for notice in &submission.notices {
            warn!("{step}: {notice}");
        }
        if let Some(analysis) = submission.analysis {
            analyses.push((step, analysis));
        }
    }

    match ClothingSummary::consolidate(&analyses) {
        Some(summary) => info!(
            "Clothing summary from {} photo(s): top={:?} {:?}, bottom={:?}, confidence {:.2}",
            summary.analysis_count,
            summary.top_color,
            summary.top_style,
            summary.bottom_color,
            summary.confidence
        ),
        None => info!("No appearance analysis available for round {round}"),
    }
    Ok(())
}
