use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::detector::{DetectorSettings, FireSettings};
use crate::frame::Roi;
use crate::predicates::HsvRange;
use crate::Point;

const DEFAULT_DB_PATH: &str = "watchtower_events.db";
const DEFAULT_REFLEX_URL: &str = "http://localhost:8001/api";
const DEFAULT_INSIGHT_URL: &str = "http://localhost:8002";
const DEFAULT_CONFIDENCE: f32 = 0.6;
const DEFAULT_COOLDOWN_SECS: u64 = 15;
const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 15;
const DEFAULT_DISPATCH_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_TRACK_TTL_SECS: u64 = 60;
const DEFAULT_FRAME_WIDTH: u32 = 1280;
const DEFAULT_FRAME_HEIGHT: u32 = 720;
const SINGLE_CAMERA: (&str, &str) = ("LobbyCam-01", "stub://lobbycam-01");
const SHOWCASE_CAMERAS: [(&str, &str); 6] = [
    ("Lobby", "stub://lobby"),
    ("Courtyard", "stub://courtyard"),
    ("Library", "stub://library"),
    ("Parking", "stub://parking"),
    ("Cafeteria", "stub://cafeteria"),
    ("Gym", "stub://gym"),
];

/// Operating mode. Picks the camera set and the time thresholds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// One camera, realistic thresholds.
    #[default]
    Single,
    /// Six-camera demo grid with short thresholds so events show up quickly.
    Showcase,
}

impl Mode {
    fn loitering_duration(self) -> Duration {
        match self {
            Mode::Single => Duration::from_secs(10),
            Mode::Showcase => Duration::from_secs(5),
        }
    }

    fn abandoned_duration(self) -> Duration {
        match self {
            Mode::Single => Duration::from_secs(30),
            Mode::Showcase => Duration::from_secs(8),
        }
    }

    fn default_cameras(self) -> Vec<CameraConfig> {
        let pairs: &[(&str, &str)] = match self {
            Mode::Single => &[SINGLE_CAMERA],
            Mode::Showcase => &SHOWCASE_CAMERAS,
        };
        pairs
            .iter()
            .map(|(id, source)| CameraConfig {
                id: id.to_string(),
                source: CameraSource::parse(source),
            })
            .collect()
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(Mode::Single),
            "showcase" => Ok(Mode::Showcase),
            other => Err(anyhow!("unknown mode {:?} (expected single or showcase)", other)),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Mode::Single => "single",
            Mode::Showcase => "showcase",
        })
    }
}

/// Where a camera's frames come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CameraSource {
    /// Local capture device index.
    Device(u32),
    /// File, directory or stream locator (`stub://...`, image directory, ...).
    Path(String),
}

impl CameraSource {
    /// All-digit sources are device indices; anything else is a path.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        match value.parse::<u32>() {
            Ok(index) => CameraSource::Device(index),
            Err(_) => CameraSource::Path(value.to_string()),
        }
    }
}

impl std::fmt::Display for CameraSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraSource::Device(index) => write!(f, "device:{}", index),
            CameraSource::Path(path) => f.write_str(path),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraConfig {
    pub id: String,
    pub source: CameraSource,
}

impl CameraConfig {
    /// Parse `ID=SOURCE`, as accepted on the command line and in `WATCHTOWER_CAMERAS`.
    pub fn parse(spec: &str) -> Result<Self> {
        let (id, source) = spec
            .split_once('=')
            .ok_or_else(|| anyhow!("camera {:?} must be ID=SOURCE", spec))?;
        let (id, source) = (id.trim(), source.trim());
        if source.is_empty() {
            return Err(anyhow!("camera {:?} has an empty source", id));
        }
        Ok(Self {
            id: id.to_string(),
            source: CameraSource::parse(source),
        })
    }
}

#[derive(Debug, Deserialize, Default)]
struct WatchtowerConfigFile {
    mode: Option<Mode>,
    db_path: Option<String>,
    reflex_url: Option<String>,
    insight_url: Option<String>,
    confidence: Option<f32>,
    cooldown_secs: Option<u64>,
    health_interval_secs: Option<u64>,
    dispatch_timeout_ms: Option<u64>,
    detections_path: Option<PathBuf>,
    cameras: Option<Vec<CameraFile>>,
    fall: Option<FallFile>,
    intrusion: Option<IntrusionFile>,
    loitering: Option<LoiteringFile>,
    abandoned: Option<AbandonedFile>,
    violence: Option<ViolenceFile>,
    fire: Option<FireFile>,
    tracking: Option<TrackingFile>,
    frame: Option<FrameFile>,
}

#[derive(Debug, Deserialize)]
struct CameraFile {
    id: String,
    source: SourceFile,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SourceFile {
    Device(u32),
    Path(String),
}

#[derive(Debug, Deserialize, Default)]
struct FallFile {
    ratio: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct IntrusionFile {
    zone: Option<Vec<[f32; 2]>>,
}

#[derive(Debug, Deserialize, Default)]
struct LoiteringFile {
    seconds: Option<f64>,
    distance: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct AbandonedFile {
    seconds: Option<f64>,
    radius: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct ViolenceFile {
    speed_threshold: Option<f32>,
    min_samples: Option<usize>,
    reach: Option<[f32; 2]>,
}

#[derive(Debug, Deserialize, Default)]
struct FireFile {
    roi: Option<[u32; 4]>,
    threshold: Option<f32>,
    hsv_lower: Option<[u8; 3]>,
    hsv_upper: Option<[u8; 3]>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingFile {
    ttl_secs: Option<u64>,
    capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct FrameFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct WatchtowerConfig {
    pub mode: Mode,
    pub db_path: String,
    pub reflex_url: String,
    pub insight_url: String,
    /// Detections below this confidence are dropped before the rules run.
    pub min_confidence: f32,
    pub cooldown: Duration,
    pub health_interval: Duration,
    pub dispatch_timeout: Duration,
    /// Recorded detections to replay instead of the stub backend.
    pub detections_path: Option<PathBuf>,
    pub cameras: Vec<CameraConfig>,
    pub detector: DetectorSettings,
    pub tracking: TrackingSettings,
    pub frame: FrameSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSettings {
    /// Tracks not seen for this long are forgotten.
    pub ttl: Duration,
    pub capacity: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameSettings {
    pub width: u32,
    pub height: u32,
}

impl WatchtowerConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("WATCHTOWER_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        Self::load_from(config_path.as_deref(), None)
    }

    /// Load from an explicit file (or defaults), then apply the environment.
    ///
    /// `mode` (from the command line) takes precedence over `WATCHTOWER_MODE` and the
    /// file.
    pub fn load_from(config_path: Option<&Path>, mode: Option<Mode>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let env_mode = match std::env::var("WATCHTOWER_MODE") {
            Ok(value) if !value.trim().is_empty() => Some(value.parse::<Mode>()?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default(), mode.or(env_mode))?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: WatchtowerConfigFile, mode_override: Option<Mode>) -> Result<Self> {
        let mode = mode_override.or(file.mode).unwrap_or_default();
        let defaults = DetectorSettings::default();

        let cameras = match file.cameras {
            Some(cameras) => cameras
                .into_iter()
                .map(|camera| CameraConfig {
                    id: camera.id,
                    source: match camera.source {
                        SourceFile::Device(index) => CameraSource::Device(index),
                        SourceFile::Path(path) => CameraSource::parse(&path),
                    },
                })
                .collect(),
            None => mode.default_cameras(),
        };

        let fall = file.fall.unwrap_or_default();
        let intrusion = file.intrusion.unwrap_or_default();
        let loitering = file.loitering.unwrap_or_default();
        let abandoned = file.abandoned.unwrap_or_default();
        let violence = file.violence.unwrap_or_default();
        let fire = file.fire.unwrap_or_default();
        let tracking = file.tracking.unwrap_or_default();
        let frame = file.frame.unwrap_or_default();

        let detector = DetectorSettings {
            fall_ratio: fall.ratio.unwrap_or(defaults.fall_ratio),
            intrusion_zone: intrusion
                .zone
                .map(|zone| zone.into_iter().map(|[x, y]| Point::new(x, y)).collect())
                .unwrap_or(defaults.intrusion_zone),
            loitering_duration: seconds(loitering.seconds, "loitering.seconds")?
                .unwrap_or_else(|| mode.loitering_duration()),
            loitering_distance: loitering.distance.unwrap_or(defaults.loitering_distance),
            abandoned_duration: seconds(abandoned.seconds, "abandoned.seconds")?
                .unwrap_or_else(|| mode.abandoned_duration()),
            attendance_radius: abandoned.radius.unwrap_or(defaults.attendance_radius),
            speed_threshold: violence.speed_threshold.unwrap_or(defaults.speed_threshold),
            min_velocity_samples: violence.min_samples.unwrap_or(defaults.min_velocity_samples),
            weapon_reach: violence
                .reach
                .map(|[w, h]| (w, h))
                .unwrap_or(defaults.weapon_reach),
            fire: FireSettings {
                roi: fire
                    .roi
                    .map(|[x1, y1, x2, y2]| Roi::new(x1, y1, x2, y2))
                    .unwrap_or(defaults.fire.roi),
                threshold: fire.threshold.unwrap_or(defaults.fire.threshold),
                color: HsvRange {
                    lower: fire.hsv_lower.unwrap_or(defaults.fire.color.lower),
                    upper: fire.hsv_upper.unwrap_or(defaults.fire.color.upper),
                },
            },
        };

        Ok(Self {
            mode,
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            reflex_url: file
                .reflex_url
                .unwrap_or_else(|| DEFAULT_REFLEX_URL.to_string()),
            insight_url: file
                .insight_url
                .unwrap_or_else(|| DEFAULT_INSIGHT_URL.to_string()),
            min_confidence: file.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            cooldown: Duration::from_secs(file.cooldown_secs.unwrap_or(DEFAULT_COOLDOWN_SECS)),
            health_interval: Duration::from_secs(
                file.health_interval_secs
                    .unwrap_or(DEFAULT_HEALTH_INTERVAL_SECS),
            ),
            dispatch_timeout: Duration::from_millis(
                file.dispatch_timeout_ms
                    .unwrap_or(DEFAULT_DISPATCH_TIMEOUT_MS),
            ),
            detections_path: file.detections_path,
            cameras,
            detector,
            tracking: TrackingSettings {
                ttl: Duration::from_secs(tracking.ttl_secs.unwrap_or(DEFAULT_TRACK_TTL_SECS)),
                capacity: tracking
                    .capacity
                    .unwrap_or(crate::tracking::DEFAULT_CAPACITY),
            },
            frame: FrameSettings {
                width: frame.width.unwrap_or(DEFAULT_FRAME_WIDTH),
                height: frame.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("WATCHTOWER_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(url) = std::env::var("WATCHTOWER_REFLEX_URL") {
            if !url.trim().is_empty() {
                self.reflex_url = url;
            }
        }
        if let Ok(url) = std::env::var("WATCHTOWER_INSIGHT_URL") {
            if !url.trim().is_empty() {
                self.insight_url = url;
            }
        }
        if let Ok(cooldown) = std::env::var("WATCHTOWER_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.trim().parse().map_err(|_| {
                anyhow!("WATCHTOWER_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.cooldown = Duration::from_secs(seconds);
        }
        if let Ok(confidence) = std::env::var("WATCHTOWER_CONFIDENCE") {
            self.min_confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("WATCHTOWER_CONFIDENCE must be a number"))?;
        }
        if let Ok(cameras) = std::env::var("WATCHTOWER_CAMERAS") {
            let parsed = split_csv(&cameras)
                .iter()
                .map(|spec| CameraConfig::parse(spec))
                .collect::<Result<Vec<_>>>()?;
            if !parsed.is_empty() {
                self.cameras = parsed;
            }
        }
        Ok(())
    }

    /// Replace the configured cameras, e.g. with `--camera` arguments.
    pub fn set_cameras(&mut self, cameras: Vec<CameraConfig>) -> Result<()> {
        if cameras.is_empty() {
            return Ok(());
        }
        self.cameras = cameras;
        self.validate()
    }

    fn validate(&mut self) -> Result<()> {
        if self.cameras.is_empty() {
            return Err(anyhow!("at least one camera must be configured"));
        }
        let mut seen = HashSet::new();
        for camera in &self.cameras {
            crate::validate_camera_id(&camera.id)?;
            if !seen.insert(camera.id.as_str()) {
                return Err(anyhow!("camera id {:?} is configured twice", camera.id));
            }
        }

        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(anyhow!("confidence must be within [0, 1]"));
        }
        let detector = &self.detector;
        if detector.fall_ratio <= 0.0 {
            return Err(anyhow!("fall.ratio must be greater than zero"));
        }
        if matches!(detector.intrusion_zone.len(), 1 | 2) {
            return Err(anyhow!(
                "intrusion.zone needs at least three vertices (or none to disable)"
            ));
        }
        if detector.loitering_duration.is_zero() || detector.abandoned_duration.is_zero() {
            return Err(anyhow!("loitering and abandoned durations must be greater than zero"));
        }
        if detector.min_velocity_samples == 0 {
            return Err(anyhow!("violence.min_samples must be at least 1"));
        }
        let fire = &detector.fire;
        if !(fire.threshold > 0.0 && fire.threshold <= 1.0) {
            return Err(anyhow!("fire.threshold must be within (0, 1]"));
        }
        if fire.roi.area() == 0 {
            return Err(anyhow!("fire.roi must have x2 > x1 and y2 > y1"));
        }
        if (0..3).any(|c| fire.color.lower[c] > fire.color.upper[c]) {
            return Err(anyhow!("fire.hsv_lower must not exceed fire.hsv_upper"));
        }

        if self.health_interval.is_zero() {
            return Err(anyhow!("health_interval_secs must be greater than zero"));
        }
        if self.dispatch_timeout.is_zero() {
            return Err(anyhow!("dispatch_timeout_ms must be greater than zero"));
        }
        if self.tracking.ttl.is_zero() || self.tracking.capacity == 0 {
            return Err(anyhow!("tracking ttl and capacity must be greater than zero"));
        }
        if self.frame.width == 0 || self.frame.height == 0 {
            return Err(anyhow!("frame width and height must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<WatchtowerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn seconds(value: Option<f64>, field: &str) -> Result<Option<Duration>> {
    value
        .map(|secs| {
            Duration::try_from_secs_f64(secs)
                .map_err(|_| anyhow!("{} must be a non-negative number of seconds", field))
        })
        .transpose()
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
