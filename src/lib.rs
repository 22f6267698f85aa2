//! Ambient Perception Kernel
//!
//! Turns live multi-camera video into a continuously updated model of ambient
//! human activity (crowd size, movement energy, stationary ratio, device-use ratio,
//! velocity-band counts) for a downstream sonification stage.
//!
//! # Architecture
//!
//! Data flows one way, once per tick:
//!
//! 1. **Ingest**: one capture thread per camera keeps the latest frame in a
//!    latest-wins slot and reconnects on failure. The `StreamRegistry` snapshots
//!    every slot without blocking.
//! 2. **Vision**: per camera, a throttled motion detector produces centroid
//!    detections and a greedy tracker keeps persistent track identities.
//! 3. **Fusion**: all cameras' tracks are aggregated into one `GlobalFeatures`
//!    vector and exponentially smoothed.
//! 4. **Sink**: the smoothed vector is handed to a `FeatureSink`.
//!
//! # Module Structure
//!
//! - `config`: configuration loading and startup validation
//! - `frame`: frames, per-camera samples, latest-frame slot
//! - `ingest`: capture backends, `StreamSource`, `StreamRegistry`
//! - `detect`: motion detector backends
//! - `tracker`, `vision`: per-camera tracking
//! - `fusion`: cross-camera aggregation and smoothing
//! - `sink`, `pipeline`: output boundary and tick loop

use anyhow::{anyhow, Result};
use std::sync::OnceLock;
use std::time::Instant;

pub mod config;
pub mod detect;
pub mod frame;
pub mod fusion;
pub mod ingest;
pub mod pipeline;
pub mod sink;
pub mod tracker;
pub mod vision;

pub use config::{
    CameraSettings, FusionSettings, PipelineConfig, RtspProtocol, RtspSettings,
    SyntheticSettings, TrackerSettings, Transport, VisionSettings,
};
pub use detect::{BackendRegistry, BackgroundBackend, Detection, DetectorBackend, StubBackend};
pub use frame::{Frame, FrameSample, LatestFrame};
pub use fusion::{FeatureFusion, GlobalFeatures};
pub use ingest::{Capture, CaptureOpener, StreamRegistry, StreamSource, StreamStats};
pub use pipeline::Pipeline;
pub use sink::{FeatureSink, JsonLinesSink, LogSink};
pub use tracker::{PersonState, Track, TrackId, TrackUpdate, Tracker};
pub use vision::VisionEngine;

/// Monotonic seconds since the first call in this process.
///
/// Capture timestamps and tick times share this clock so that track ages can be
/// compared across connected and disconnected ticks. Wall-clock steps (NTP, manual
/// changes) cannot make it jump or run backwards.
pub fn clock_secs() -> f64 {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    ORIGIN.get_or_init(Instant::now).elapsed().as_secs_f64()
}

/// Camera ids are local labels used in logs and snapshot keys.
///
/// Allowed: "lobby", "cam_02", "north-door"
/// Disallowed: empty, longer than 64, whitespace, slashes, other punctuation.
pub fn validate_camera_id(camera_id: &str) -> Result<()> {
    static CAMERA_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = CAMERA_ID_RE.get_or_init(|| {
        regex::Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("camera id pattern is valid")
    });

    if !re.is_match(camera_id) {
        return Err(anyhow!(
            "camera id '{}' must match ^[A-Za-z0-9_-]{{1,64}}$",
            camera_id
        ));
    }
    Ok(())
}
