//! watchtower - per-camera event detection daemon.
//!
//! Starts one unit per configured camera, plus the alert worker and the health
//! reporter, and runs until every unit has stopped or Ctrl-C is pressed.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use campus_watchtower::config::{CameraConfig, Mode, WatchtowerConfig};
use campus_watchtower::detect::{ReplayBackend, StubBackend};
use campus_watchtower::stream::UnitHandle;
use campus_watchtower::{
    open_source, AlertWorker, CameraUnit, CooldownGate, DetectorBackend, EventDetector,
    HealthReporter, HttpHealthPing, HttpReflexDispatcher, SqliteEventLog, TrackStore,
    UnitSettings, MODULE_NAME,
};

const ALERT_QUEUE_CAPACITY: usize = 64;

#[derive(Parser, Debug)]
#[command(author, version, about = "Campus watchtower: event detection over camera streams")]
struct Args {
    /// Config file (TOML, or JSON with a .json extension).
    #[arg(long, env = "WATCHTOWER_CONFIG")]
    config: Option<PathBuf>,

    /// Operating mode: single (one camera, realistic thresholds) or showcase.
    #[arg(long, value_name = "MODE")]
    mode: Option<Mode>,

    /// Camera to run, as ID=SOURCE. Repeatable; replaces configured cameras.
    #[arg(long = "camera", value_name = "ID=SOURCE")]
    cameras: Vec<String>,

    /// Replay recorded detections (JSON lines) instead of the stub detector.
    #[arg(long, value_name = "PATH")]
    detections: Option<PathBuf>,

    /// Do not post reflex actions.
    #[arg(long)]
    no_dispatch: bool,

    /// Do not send health pings.
    #[arg(long)]
    no_health: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = WatchtowerConfig::load_from(args.config.as_deref(), args.mode)?;
    let cameras = args
        .cameras
        .iter()
        .map(|spec| CameraConfig::parse(spec))
        .collect::<Result<Vec<_>>>()?;
    cfg.set_cameras(cameras)?;
    if args.detections.is_some() {
        cfg.detections_path = args.detections.clone();
    }

    log::info!(
        "watchtower starting in {} mode with {} camera(s); events -> {}",
        cfg.mode,
        cfg.cameras.len(),
        cfg.db_path
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        })
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    }

    let alerts = (!args.no_dispatch).then(|| {
        AlertWorker::spawn(
            HttpReflexDispatcher::new(&cfg.reflex_url, cfg.dispatch_timeout),
            ALERT_QUEUE_CAPACITY,
        )
    });
    let health = if args.no_health {
        None
    } else {
        Some(HealthReporter::spawn(
            HttpHealthPing::new(&cfg.insight_url, cfg.dispatch_timeout),
            MODULE_NAME,
            cfg.health_interval,
            shutdown.clone(),
        )?)
    };

    let mut units = Vec::new();
    for camera in &cfg.cameras {
        match build_unit(&cfg, camera, alerts.as_ref(), shutdown.clone()).and_then(CameraUnit::spawn) {
            Ok(handle) => units.push(handle),
            Err(e) => log::warn!("camera {} skipped: {:#}", camera.id, e),
        }
    }
    if units.is_empty() {
        shutdown.store(true, Ordering::SeqCst);
        if let Some(health) = health {
            health.join();
        }
        return Err(anyhow!("no camera could be started"));
    }
    log::info!("watchtower running {} unit(s); Ctrl-C to stop", units.len());

    while !shutdown.load(Ordering::SeqCst) && !units.iter().all(UnitHandle::is_finished) {
        std::thread::sleep(Duration::from_millis(200));
    }
    if shutdown.swap(true, Ordering::SeqCst) {
        log::info!("shutdown signal received, stopping units...");
    }

    for unit in units {
        let camera_id = unit.camera_id().to_string();
        if let Some(stats) = unit.join() {
            log::info!(
                "camera {}: {} frames, {} surfaced, {} suppressed",
                camera_id,
                stats.frames_processed,
                stats.events_surfaced,
                stats.events_suppressed
            );
        }
    }
    if let Some(worker) = alerts {
        let stats = worker.shutdown();
        log::info!(
            "alerts: {} dispatched, {} failed, {} dropped",
            stats.dispatched,
            stats.failed,
            stats.dropped
        );
    }
    if let Some(health) = health {
        log::debug!("health pings sent: {}", health.join());
    }
    Ok(())
}

fn build_unit(
    cfg: &WatchtowerConfig,
    camera: &CameraConfig,
    alerts: Option<&AlertWorker>,
    shutdown: Arc<AtomicBool>,
) -> Result<CameraUnit> {
    let source = open_source(&camera.source, cfg.frame.width, cfg.frame.height)?;
    let backend: Box<dyn DetectorBackend> = match &cfg.detections_path {
        Some(path) => Box::new(ReplayBackend::open(path)?),
        None => {
            log::warn!(
                "camera {}: no detector configured; using the stub backend",
                camera.id
            );
            Box::new(StubBackend::new())
        }
    };
    let sink = SqliteEventLog::open(&cfg.db_path)?;

    let mut unit = CameraUnit::new(
        &camera.id,
        source,
        backend,
        EventDetector::new(cfg.detector.clone()),
        CooldownGate::new(cfg.cooldown),
        shutdown,
    )?
    .with_sink(Box::new(sink))
    .with_store(TrackStore::new(cfg.tracking.capacity))
    .with_settings(UnitSettings {
        min_confidence: cfg.min_confidence,
        track_ttl: cfg.tracking.ttl,
        ..UnitSettings::default()
    });
    if let Some(sender) = alerts.and_then(AlertWorker::sender) {
        unit = unit.with_alerts(sender);
    }
    Ok(unit)
}
