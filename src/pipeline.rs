//! The tick loop: snapshot → detect/track per camera → fuse → sink.
//!
//! Everything here runs on the caller's thread. Capture threads are only ever
//! touched through `StreamRegistry::snapshot`, so tracker and fusion state need
//! no locking.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::config::PipelineConfig;
use crate::detect::BackendRegistry;
use crate::fusion::{FeatureFusion, GlobalFeatures};
use crate::ingest::StreamRegistry;
use crate::sink::FeatureSink;
use crate::vision::VisionEngine;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

pub struct Pipeline {
    tick_interval: Duration,
    shutdown_timeout: Duration,
    registry: StreamRegistry,
    vision: VisionEngine,
    fusion: FeatureFusion,
    features: GlobalFeatures,
    sink: Box<dyn FeatureSink>,
    ticks: u64,
}

impl Pipeline {
    /// Build every stage from configuration. Configuration errors surface here,
    /// before any capture thread exists.
    pub fn new(config: &PipelineConfig, sink: Box<dyn FeatureSink>) -> Result<Self> {
        let registry = StreamRegistry::from_config(&config.cameras)?;
        let vision = VisionEngine::new(config.vision.clone(), &BackendRegistry::with_builtin())?;
        Ok(Self::from_parts(config, registry, vision, sink))
    }

    /// Assemble from prebuilt stages (custom capture or detector backends).
    pub fn from_parts(
        config: &PipelineConfig,
        registry: StreamRegistry,
        vision: VisionEngine,
        sink: Box<dyn FeatureSink>,
    ) -> Self {
        Self {
            tick_interval: config.tick_interval,
            shutdown_timeout: config.shutdown_timeout,
            registry,
            vision,
            fusion: FeatureFusion::new(config.fusion),
            features: GlobalFeatures::default(),
            sink,
            ticks: 0,
        }
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    pub fn vision(&self) -> &VisionEngine {
        &self.vision
    }

    /// Current smoothed features (all zero before the first tick).
    pub fn features(&self) -> GlobalFeatures {
        self.features
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn start(&mut self) -> Result<()> {
        self.registry.start()
    }

    pub fn stop(&mut self) -> Result<()> {
        self.registry.stop(self.shutdown_timeout)
    }

    /// One tick at time `now` (seconds since the UNIX epoch).
    ///
    /// Never fails: disconnected cameras contribute nothing and sink errors are
    /// logged.
    pub fn tick(&mut self, now: f64) -> GlobalFeatures {
        let frames = self.registry.snapshot();
        let results = self.vision.process(&frames, now);
        self.features = self.fusion.update(&self.features, &results);
        self.ticks += 1;

        if let Err(err) = self.sink.publish(&self.features) {
            log::warn!("feature sink failed: {:#}", err);
        }
        self.features
    }

    /// Start capture, tick until `stop` is set (or `max_ticks` ticks ran), then
    /// stop capture within the configured shutdown timeout.
    ///
    /// Returns the number of ticks executed.
    pub fn run(&mut self, stop: &AtomicBool, max_ticks: Option<u64>) -> Result<u64> {
        self.start()?;
        log::info!(
            "pipeline running: {} camera(s), tick every {:?}, detector {}",
            self.registry.len(),
            self.tick_interval,
            self.vision.settings().backend
        );

        let first_tick = self.ticks;
        let mut last_health_log = Instant::now();
        while !stop.load(Ordering::SeqCst) {
            if max_ticks.is_some_and(|max| self.ticks - first_tick >= max) {
                break;
            }
            let started = Instant::now();
            self.tick(crate::clock_secs());

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                self.log_health();
                last_health_log = Instant::now();
            }

            if let Some(rest) = self.tick_interval.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }

        let ran = self.ticks - first_tick;
        log::info!("pipeline stopping after {} tick(s)", ran);
        self.stop()?;
        Ok(ran)
    }

    fn log_health(&self) {
        for stats in self.registry.stats() {
            log::info!(
                "camera {} connected={} frames={} failures={} reconnects={} tracks={} source={}",
                stats.camera_id,
                stats.connected,
                stats.frames_captured,
                stats.failures,
                stats.reconnects,
                self.vision.track_count(&stats.camera_id).unwrap_or(0),
                stats.locator
            );
        }
        let f = &self.features;
        log::info!(
            "features people={} energy={:.2} stationary={:.2} device_use={:.2}",
            f.total_people,
            f.movement_energy,
            f.stationary_ratio,
            f.device_use_ratio
        );
    }
}
