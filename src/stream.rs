//! Per-camera processing loop.
//!
//! A `CameraUnit` owns everything one camera needs: its frame source, detector
//! backend, track store and cooldown gate. Nothing in a unit is shared with other
//! units, so each runs on its own thread without locking. Outbound work (event log,
//! alert queue) is best effort: failures are logged and the loop moves on.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::cooldown::CooldownGate;
use crate::detect::DetectorBackend;
use crate::detector::EventDetector;
use crate::dispatch::AlertSender;
use crate::frame::Frame;
use crate::health::sleep_unless_shutdown;
use crate::ingest::FrameSource;
use crate::storage::EventSink;
use crate::tracking::TrackStore;
use crate::{now_s, EventRecord, MODULE_NAME};

#[derive(Clone, Debug, PartialEq)]
pub struct UnitSettings {
    /// Detections below this confidence are ignored.
    pub min_confidence: f32,
    /// Tracks unseen for this long are evicted.
    pub track_ttl: Duration,
    pub sweep_interval: Duration,
    pub stats_interval: Duration,
    /// Restart file-backed sources at end of stream instead of stopping.
    pub loop_files: bool,
    /// First retry delay after a live source fails; doubles up to `retry_max`.
    pub retry_initial: Duration,
    pub retry_max: Duration,
}

impl Default for UnitSettings {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            track_ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(5),
            stats_interval: Duration::from_secs(5),
            loop_files: true,
            retry_initial: Duration::from_millis(100),
            retry_max: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnitStats {
    pub frames_processed: u64,
    pub events_surfaced: u64,
    pub events_suppressed: u64,
    pub detector_errors: u64,
    pub read_failures: u64,
    pub tracks_evicted: u64,
    pub rewinds: u64,
}

pub struct CameraUnit {
    camera_id: String,
    source: Box<dyn FrameSource>,
    backend: Box<dyn DetectorBackend>,
    detector: EventDetector,
    store: TrackStore,
    gate: CooldownGate,
    sink: Option<Box<dyn EventSink>>,
    alerts: Option<AlertSender>,
    settings: UnitSettings,
    shutdown: Arc<AtomicBool>,
    stats: UnitStats,
}

impl CameraUnit {
    pub fn new(
        camera_id: &str,
        source: Box<dyn FrameSource>,
        backend: Box<dyn DetectorBackend>,
        detector: EventDetector,
        gate: CooldownGate,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        crate::validate_camera_id(camera_id)?;
        Ok(Self {
            camera_id: camera_id.to_string(),
            source,
            backend,
            detector,
            store: TrackStore::default(),
            gate,
            sink: None,
            alerts: None,
            settings: UnitSettings::default(),
            shutdown,
            stats: UnitStats::default(),
        })
    }

    pub fn with_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_alerts(mut self, alerts: AlertSender) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn with_settings(mut self, settings: UnitSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_store(mut self, store: TrackStore) -> Self {
        self.store = store;
        self
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn stats(&self) -> &UnitStats {
        &self.stats
    }

    pub fn store(&self) -> &TrackStore {
        &self.store
    }

    /// Detect, run the rules, gate, and forward one frame's events.
    ///
    /// Returns the events that passed the cooldown gate.
    pub fn process_frame(&mut self, frame: &Frame, now: Instant) -> Vec<EventRecord> {
        self.stats.frames_processed += 1;
        let batch = match self.backend.detect(frame) {
            Ok(batch) => batch.retain_confident(self.settings.min_confidence),
            Err(e) => {
                self.stats.detector_errors += 1;
                log::warn!(
                    "camera {}: detector {} failed on frame {}: {:#}",
                    self.camera_id,
                    self.backend.name(),
                    frame.index,
                    e
                );
                return Vec::new();
            }
        };

        let detected = self.detector.process(&batch, &mut self.store, frame, now);
        let mut surfaced = Vec::new();
        for event in detected {
            if !self.gate.should_fire(&self.camera_id, event.kind, now) {
                self.stats.events_suppressed += 1;
                log::debug!("camera {}: {} suppressed by cooldown", self.camera_id, event.kind);
                continue;
            }
            let record = EventRecord::bind(event, &self.camera_id, now_s().unwrap_or(0));
            self.stats.events_surfaced += 1;
            log::warn!(
                "camera {}: {} {}",
                self.camera_id,
                record.event_type,
                serde_json::to_string(&record.details).unwrap_or_default()
            );
            self.forward(&record);
            surfaced.push(record);
        }
        surfaced
    }

    fn forward(&mut self, record: &EventRecord) {
        if let Some(sink) = self.sink.as_mut() {
            let logged = serde_json::to_value(record)
                .map_err(anyhow::Error::from)
                .and_then(|value| sink.record(MODULE_NAME, record.event_type.as_str(), &value));
            if let Err(e) = logged {
                log::warn!("camera {}: could not log event: {:#}", self.camera_id, e);
            }
        }
        if let Some(alerts) = &self.alerts {
            alerts.submit(record.clone());
        }
    }

    /// Drop tracks not seen within the TTL.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let evicted = self.store.evict_stale(now, self.settings.track_ttl);
        self.stats.tracks_evicted += evicted as u64;
        if evicted > 0 {
            log::debug!("camera {}: evicted {} stale track(s)", self.camera_id, evicted);
        }
        evicted
    }

    /// Pull frames until shutdown or end of stream.
    ///
    /// The source and backend are released when this returns, on every path.
    pub fn run(mut self) -> Result<UnitStats> {
        self.source
            .connect()
            .with_context(|| format!("camera {}: connect {}", self.camera_id, self.source.describe()))?;
        self.backend
            .warm_up()
            .with_context(|| format!("camera {}: warm up {}", self.camera_id, self.backend.name()))?;
        log::info!(
            "camera {} running: source={} backend={} live={}",
            self.camera_id,
            self.source.describe(),
            self.backend.name(),
            self.source.is_live()
        );

        let mut backoff = self.settings.retry_initial;
        let mut frames_since_rewind = 0u64;
        let mut last_sweep = Instant::now();
        let mut last_stats = Instant::now();

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.source.next_frame() {
                Ok(Some(frame)) => {
                    backoff = self.settings.retry_initial;
                    frames_since_rewind += 1;
                    self.process_frame(&frame, Instant::now());
                }
                Ok(None) => {
                    // an empty pass would rewind forever
                    if self.settings.loop_files && frames_since_rewind > 0 {
                        self.source.rewind()?;
                        self.stats.rewinds += 1;
                        frames_since_rewind = 0;
                        log::info!("camera {}: end of stream, rewinding", self.camera_id);
                        continue;
                    }
                    log::info!("camera {}: end of stream", self.camera_id);
                    break;
                }
                Err(e) if self.source.is_live() => {
                    self.stats.read_failures += 1;
                    log::warn!(
                        "camera {}: read failed ({:#}); retrying in {:?}",
                        self.camera_id,
                        e,
                        backoff
                    );
                    sleep_unless_shutdown(backoff, &self.shutdown);
                    backoff = (backoff * 2).min(self.settings.retry_max);
                    continue;
                }
                Err(e) => {
                    self.stats.read_failures += 1;
                    log::warn!(
                        "camera {}: read failed ({:#}); treating as end of stream",
                        self.camera_id,
                        e
                    );
                    break;
                }
            }

            if last_sweep.elapsed() >= self.settings.sweep_interval {
                self.sweep(Instant::now());
                last_sweep = Instant::now();
            }
            if last_stats.elapsed() >= self.settings.stats_interval {
                self.log_stats();
                last_stats = Instant::now();
            }
        }

        self.log_stats();
        log::info!("camera {} stopped", self.camera_id);
        Ok(self.stats)
    }

    fn log_stats(&self) {
        let source = self.source.stats();
        log::info!(
            "camera {} frames={} surfaced={} suppressed={} tracks={}/{} captured={} read_failures={}",
            self.camera_id,
            self.stats.frames_processed,
            self.stats.events_surfaced,
            self.stats.events_suppressed,
            self.store.person_count(),
            self.store.object_count(),
            source.frames_captured,
            source.read_failures
        );
    }

    /// Run on a dedicated thread named after the camera.
    pub fn spawn(self) -> Result<UnitHandle> {
        let camera_id = self.camera_id.clone();
        let handle = std::thread::Builder::new()
            .name(format!("camera-{}", camera_id))
            .spawn(move || self.run())
            .map_err(|e| anyhow!("failed to spawn unit for camera {}: {}", camera_id, e))?;
        Ok(UnitHandle { camera_id, handle })
    }
}

pub struct UnitHandle {
    camera_id: String,
    handle: JoinHandle<Result<UnitStats>>,
}

impl UnitHandle {
    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the unit. Errors and panics are logged here and never reach
    /// other units.
    pub fn join(self) -> Option<UnitStats> {
        match self.handle.join() {
            Ok(Ok(stats)) => Some(stats),
            Ok(Err(e)) => {
                log::error!("camera {} failed: {:#}", self.camera_id, e);
                None
            }
            Err(_) => {
                log::error!("camera {} panicked", self.camera_id);
                None
            }
        }
    }
}
