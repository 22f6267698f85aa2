use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

const DEFAULT_TICK_INTERVAL_MS: u64 = 50;
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_SYNTHETIC_CAMERA_ID: &str = "synthetic";

const DEFAULT_LATENCY_MS: u32 = 200;
const DEFAULT_RECONNECT_INTERVAL_S: f64 = 2.0;
const DEFAULT_SYNTHETIC_WIDTH: u32 = 320;
const DEFAULT_SYNTHETIC_HEIGHT: u32 = 240;
const DEFAULT_SYNTHETIC_FPS: u32 = 15;
const DEFAULT_SYNTHETIC_WALKERS: u32 = 3;

const DEFAULT_VISION_BACKEND: &str = "background";
const DEFAULT_DETECTION_INTERVAL_S: f64 = 0.2;
const DEFAULT_MIN_AREA: u32 = 800;
const DEFAULT_DISTANCE_THRESHOLD: f64 = 60.0;
const DEFAULT_MAX_LOST_S: f64 = 1.5;
const DEFAULT_TRACK_EMA_ALPHA: f64 = 0.4;
const DEFAULT_STATIONARY_THRESHOLD: f64 = 5.0;
const DEFAULT_HISTORY: u32 = 200;
const DEFAULT_VAR_THRESHOLD: f32 = 16.0;
const DEFAULT_BINARY_THRESHOLD: u8 = 200;
const DEFAULT_MEDIAN_RADIUS: u32 = 2;
const DEFAULT_DILATE_RADIUS: u8 = 2;

const DEFAULT_VELOCITY_SLOW: f64 = 10.0;
const DEFAULT_VELOCITY_MEDIUM: f64 = 30.0;
const DEFAULT_VELOCITY_FAST: f64 = 60.0;
const DEFAULT_MAX_ENERGY: f64 = 10.0;
const DEFAULT_FUSION_EMA_ALPHA: f64 = 0.3;

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    tick_interval_ms: Option<u64>,
    shutdown_timeout_ms: Option<u64>,
    cameras: Option<Vec<CameraConfigFile>>,
    vision: Option<VisionConfigFile>,
    fusion: Option<FusionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    id: Option<String>,
    transport: Option<String>,
    url: Option<String>,
    protocol: Option<String>,
    latency_ms: Option<u32>,
    reconnect_interval_s: Option<f64>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    walkers: Option<u32>,
    dropout_every: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct VisionConfigFile {
    backend: Option<String>,
    detection_interval_s: Option<f64>,
    min_area: Option<u32>,
    distance_threshold: Option<f64>,
    max_lost_s: Option<f64>,
    ema_alpha: Option<f64>,
    stationary_threshold: Option<f64>,
    history: Option<u32>,
    var_threshold: Option<f32>,
    binary_threshold: Option<u8>,
    median_radius: Option<u32>,
    dilate_radius: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct FusionConfigFile {
    velocity_slow: Option<f64>,
    velocity_medium: Option<f64>,
    velocity_fast: Option<f64>,
    max_energy: Option<f64>,
    ema_alpha: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub tick_interval: Duration,
    pub shutdown_timeout: Duration,
    pub cameras: Vec<CameraSettings>,
    pub vision: VisionSettings,
    pub fusion: FusionSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraSettings {
    pub id: String,
    pub transport: Transport,
    pub reconnect_interval: Duration,
}

/// How a camera's frames are acquired.
#[derive(Debug, Clone, PartialEq)]
pub enum Transport {
    Rtsp(RtspSettings),
    Synthetic(SyntheticSettings),
}

impl Transport {
    pub fn name(&self) -> &'static str {
        match self {
            Transport::Rtsp(_) => "rtsp",
            Transport::Synthetic(_) => "synthetic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtspProtocol {
    Tcp,
    Udp,
}

impl RtspProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            RtspProtocol::Tcp => "tcp",
            RtspProtocol::Udp => "udp",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RtspSettings {
    pub url: String,
    pub protocol: RtspProtocol,
    /// Jitter buffer hint handed to the RTSP source, in milliseconds.
    pub latency_ms: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub walkers: u32,
    /// Fail every N-th read to exercise the reconnect path.
    pub dropout_every: Option<u64>,
}

impl Default for SyntheticSettings {
    fn default() -> Self {
        Self {
            width: DEFAULT_SYNTHETIC_WIDTH,
            height: DEFAULT_SYNTHETIC_HEIGHT,
            fps: DEFAULT_SYNTHETIC_FPS,
            walkers: DEFAULT_SYNTHETIC_WALKERS,
            dropout_every: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisionSettings {
    pub backend: String,
    pub detection_interval_s: f64,
    pub min_area: u32,
    pub history: u32,
    pub var_threshold: f32,
    pub binary_threshold: u8,
    pub median_radius: u32,
    pub dilate_radius: u8,
    pub tracker: TrackerSettings,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerSettings {
    /// Maximum centroid distance (pixels, exclusive) for a detection to claim a track.
    pub distance_threshold: f64,
    /// Seconds a track may stay unmatched before it is dropped.
    pub max_lost_s: f64,
    pub ema_alpha: f64,
    /// Smoothed velocity (pixels/s) below which a track counts as stationary.
    pub stationary_threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionSettings {
    pub velocity_slow: f64,
    pub velocity_medium: f64,
    pub velocity_fast: f64,
    pub max_energy: f64,
    pub ema_alpha: f64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
            max_lost_s: DEFAULT_MAX_LOST_S,
            ema_alpha: DEFAULT_TRACK_EMA_ALPHA,
            stationary_threshold: DEFAULT_STATIONARY_THRESHOLD,
        }
    }
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_VISION_BACKEND.to_string(),
            detection_interval_s: DEFAULT_DETECTION_INTERVAL_S,
            min_area: DEFAULT_MIN_AREA,
            history: DEFAULT_HISTORY,
            var_threshold: DEFAULT_VAR_THRESHOLD,
            binary_threshold: DEFAULT_BINARY_THRESHOLD,
            median_radius: DEFAULT_MEDIAN_RADIUS,
            dilate_radius: DEFAULT_DILATE_RADIUS,
            tracker: TrackerSettings::default(),
        }
    }
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            velocity_slow: DEFAULT_VELOCITY_SLOW,
            velocity_medium: DEFAULT_VELOCITY_MEDIUM,
            velocity_fast: DEFAULT_VELOCITY_FAST,
            max_energy: DEFAULT_MAX_ENERGY,
            ema_alpha: DEFAULT_FUSION_EMA_ALPHA,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from `path`, falling back to `AMBIENT_CONFIG`, then defaults.
    ///
    /// Environment overrides are applied last and the result is validated; any
    /// problem here is fatal and must stop startup before a capture thread exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("AMBIENT_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty());
        let file_cfg = match (path, env_path.as_deref()) {
            (Some(path), _) => Some(read_config_file(path)?),
            (None, Some(path)) => Some(read_config_file(Path::new(path))?),
            (None, None) => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse and validate a TOML document without consulting the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: PipelineConfigFile =
            toml::from_str(raw).map_err(|e| anyhow!("invalid config: {}", e))?;
        let mut cfg = Self::from_file(file)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Result<Self> {
        let tick_interval = Duration::from_millis(
            file.tick_interval_ms.unwrap_or(DEFAULT_TICK_INTERVAL_MS),
        );
        let shutdown_timeout = Duration::from_millis(
            file.shutdown_timeout_ms
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_MS),
        );
        let cameras = match file.cameras {
            Some(cameras) => cameras
                .into_iter()
                .enumerate()
                .map(|(index, camera)| camera_from_file(index, camera))
                .collect::<Result<Vec<_>>>()?,
            None => vec![CameraSettings {
                id: DEFAULT_SYNTHETIC_CAMERA_ID.to_string(),
                transport: Transport::Synthetic(SyntheticSettings::default()),
                reconnect_interval: Duration::from_secs_f64(DEFAULT_RECONNECT_INTERVAL_S),
            }],
        };

        let vision_file = file.vision.unwrap_or_default();
        let defaults = VisionSettings::default();
        let vision = VisionSettings {
            backend: vision_file.backend.unwrap_or(defaults.backend),
            detection_interval_s: vision_file
                .detection_interval_s
                .unwrap_or(defaults.detection_interval_s),
            min_area: vision_file.min_area.unwrap_or(defaults.min_area),
            history: vision_file.history.unwrap_or(defaults.history),
            var_threshold: vision_file.var_threshold.unwrap_or(defaults.var_threshold),
            binary_threshold: vision_file
                .binary_threshold
                .unwrap_or(defaults.binary_threshold),
            median_radius: vision_file.median_radius.unwrap_or(defaults.median_radius),
            dilate_radius: vision_file.dilate_radius.unwrap_or(defaults.dilate_radius),
            tracker: TrackerSettings {
                distance_threshold: vision_file
                    .distance_threshold
                    .unwrap_or(defaults.tracker.distance_threshold),
                max_lost_s: vision_file
                    .max_lost_s
                    .unwrap_or(defaults.tracker.max_lost_s),
                ema_alpha: vision_file.ema_alpha.unwrap_or(defaults.tracker.ema_alpha),
                stationary_threshold: vision_file
                    .stationary_threshold
                    .unwrap_or(defaults.tracker.stationary_threshold),
            },
        };

        let fusion_file = file.fusion.unwrap_or_default();
        let defaults = FusionSettings::default();
        let fusion = FusionSettings {
            velocity_slow: fusion_file.velocity_slow.unwrap_or(defaults.velocity_slow),
            velocity_medium: fusion_file
                .velocity_medium
                .unwrap_or(defaults.velocity_medium),
            velocity_fast: fusion_file.velocity_fast.unwrap_or(defaults.velocity_fast),
            max_energy: fusion_file.max_energy.unwrap_or(defaults.max_energy),
            ema_alpha: fusion_file.ema_alpha.unwrap_or(defaults.ema_alpha),
        };

        Ok(Self {
            tick_interval,
            shutdown_timeout,
            cameras,
            vision,
            fusion,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var("AMBIENT_TICK_INTERVAL_MS") {
            if !value.trim().is_empty() {
                let ms: u64 = value.trim().parse().map_err(|_| {
                    anyhow!("AMBIENT_TICK_INTERVAL_MS must be an integer number of milliseconds")
                })?;
                self.tick_interval = Duration::from_millis(ms);
            }
        }
        if let Ok(value) = std::env::var("AMBIENT_DETECTION_INTERVAL_S") {
            if !value.trim().is_empty() {
                self.vision.detection_interval_s = value.trim().parse().map_err(|_| {
                    anyhow!("AMBIENT_DETECTION_INTERVAL_S must be a number of seconds")
                })?;
            }
        }
        if let Ok(backend) = std::env::var("AMBIENT_VISION_BACKEND") {
            if !backend.trim().is_empty() {
                self.vision.backend = backend.trim().to_string();
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            bail!("tick_interval_ms must be greater than zero");
        }

        let mut seen = HashSet::new();
        for camera in &self.cameras {
            crate::validate_camera_id(&camera.id)?;
            if !seen.insert(camera.id.as_str()) {
                bail!("duplicate camera id '{}'", camera.id);
            }
            if let Transport::Synthetic(synthetic) = &camera.transport {
                if synthetic.width == 0 || synthetic.height == 0 || synthetic.fps == 0 {
                    bail!(
                        "camera '{}': synthetic width, height and fps must be > 0",
                        camera.id
                    );
                }
                if synthetic.dropout_every == Some(0) {
                    bail!("camera '{}': dropout_every must be > 0", camera.id);
                }
            }
        }
        if self.cameras.is_empty() {
            log::warn!("no cameras configured; features will stay at zero");
        }

        let vision = &self.vision;
        if vision.backend.trim().is_empty() {
            bail!("vision.backend must not be empty");
        }
        if !(vision.detection_interval_s >= 0.0) {
            bail!("vision.detection_interval_s must be >= 0");
        }
        if vision.history == 0 {
            bail!("vision.history must be >= 1");
        }
        if !(vision.var_threshold > 0.0) {
            bail!("vision.var_threshold must be > 0");
        }
        let tracker = &vision.tracker;
        if !(tracker.distance_threshold > 0.0) {
            bail!("vision.distance_threshold must be > 0");
        }
        if !(tracker.max_lost_s >= 0.0) {
            bail!("vision.max_lost_s must be >= 0");
        }
        validate_alpha("vision.ema_alpha", tracker.ema_alpha)?;
        if !(tracker.stationary_threshold >= 0.0) {
            bail!("vision.stationary_threshold must be >= 0");
        }

        let fusion = &self.fusion;
        validate_alpha("fusion.ema_alpha", fusion.ema_alpha)?;
        if !(fusion.max_energy > 0.0) {
            bail!("fusion.max_energy must be > 0");
        }
        if !(0.0 <= fusion.velocity_slow
            && fusion.velocity_slow <= fusion.velocity_medium
            && fusion.velocity_medium <= fusion.velocity_fast)
        {
            bail!("fusion velocity bands must satisfy 0 <= slow <= medium <= fast");
        }
        Ok(())
    }
}

fn camera_from_file(index: usize, file: CameraConfigFile) -> Result<CameraSettings> {
    let id = file
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| anyhow!("camera #{} is missing an id", index))?;

    let reconnect_interval_s = file
        .reconnect_interval_s
        .unwrap_or(DEFAULT_RECONNECT_INTERVAL_S);
    if !(reconnect_interval_s > 0.0) || !reconnect_interval_s.is_finite() {
        bail!("camera '{}': reconnect_interval_s must be > 0", id);
    }

    let transport = match file.transport.as_deref().unwrap_or("rtsp") {
        "rtsp" => {
            let url = file
                .url
                .filter(|url| !url.trim().is_empty())
                .ok_or_else(|| anyhow!("camera '{}': transport rtsp requires a url", id))?;
            let protocol = match file.protocol.as_deref().unwrap_or("tcp") {
                "tcp" => RtspProtocol::Tcp,
                "udp" => RtspProtocol::Udp,
                other => bail!("camera '{}': unknown rtsp protocol '{}'", id, other),
            };
            Transport::Rtsp(RtspSettings {
                url,
                protocol,
                latency_ms: file.latency_ms.unwrap_or(DEFAULT_LATENCY_MS),
            })
        }
        "synthetic" => {
            let defaults = SyntheticSettings::default();
            Transport::Synthetic(SyntheticSettings {
                width: file.width.unwrap_or(defaults.width),
                height: file.height.unwrap_or(defaults.height),
                fps: file.fps.unwrap_or(defaults.fps),
                walkers: file.walkers.unwrap_or(defaults.walkers),
                dropout_every: file.dropout_every,
            })
        }
        other => bail!("camera '{}': unknown transport '{}'", id, other),
    };

    Ok(CameraSettings {
        id,
        transport,
        reconnect_interval: Duration::from_secs_f64(reconnect_interval_s),
    })
}

fn validate_alpha(name: &str, alpha: f64) -> Result<()> {
    if !(alpha > 0.0 && alpha <= 1.0) {
        bail!("{} must be in (0, 1]", name);
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
