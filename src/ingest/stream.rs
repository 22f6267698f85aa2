//! Per-camera acquisition loop.
//!
//! A `StreamSource` owns one background thread that repeatedly opens its capture,
//! reads frames into the camera's `LatestFrame` slot, and on any failure marks the
//! camera disconnected, waits the reconnect interval and tries again. Failures never
//! leave this module; the tick loop only ever sees connectivity flip.
//!
//! The camera counts as connected only once a frame has been read after a
//! successful open. Blocking reads receive the stop flag so a stop request is
//! honoured within `STOP_POLL`-sized slices, not after a full read timeout.

use anyhow::{anyhow, bail, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::CameraSettings;
use crate::frame::{FrameSample, LatestFrame};

use super::{opener_for, Capture, CaptureOpener, STOP_POLL};

#[derive(Debug, Default)]
struct StreamCounters {
    frames: AtomicU64,
    failures: AtomicU64,
    reconnects: AtomicU64,
}

/// Statistics for a stream source.
#[derive(Clone, Debug)]
pub struct StreamStats {
    pub camera_id: String,
    pub locator: String,
    pub frames_captured: u64,
    /// Failed opens plus failed reads.
    pub failures: u64,
    /// Connections established after a previous connection was lost.
    pub reconnects: u64,
    pub connected: bool,
    pub running: bool,
}

pub struct StreamSource {
    camera_id: String,
    locator: String,
    reconnect_interval: Duration,
    latest: Arc<LatestFrame>,
    counters: Arc<StreamCounters>,
    stop: Arc<AtomicBool>,
    /// Present while stopped; moved into the worker while running.
    opener: Option<Box<dyn CaptureOpener>>,
    worker: Option<JoinHandle<Box<dyn CaptureOpener>>>,
}

impl StreamSource {
    pub fn new(
        camera_id: &str,
        reconnect_interval: Duration,
        opener: Box<dyn CaptureOpener>,
    ) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            locator: opener.describe(),
            reconnect_interval,
            latest: Arc::new(LatestFrame::new(camera_id)),
            counters: Arc::new(StreamCounters::default()),
            stop: Arc::new(AtomicBool::new(false)),
            opener: Some(opener),
            worker: None,
        }
    }

    /// Build a source for a configured camera. Fails only on configuration errors.
    pub fn from_settings(settings: &CameraSettings) -> Result<Self> {
        let opener = opener_for(settings)?;
        Ok(Self::new(&settings.id, settings.reconnect_interval, opener))
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    /// True while the acquisition thread is alive, including while it winds down
    /// after a stop that timed out.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Spawn the acquisition thread. No-op while already running.
    ///
    /// Fails if a previous thread has been asked to stop but has not exited yet.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            if self.stop.load(Ordering::SeqCst) {
                bail!(
                    "stream {}: previous capture thread is still stopping",
                    self.camera_id
                );
            }
            return Ok(());
        }
        if let Some(worker) = self.worker.take() {
            self.reclaim(worker)?;
        }
        let opener = self.opener.take().ok_or_else(|| {
            anyhow!(
                "stream {}: capture opener was lost when its thread panicked",
                self.camera_id
            )
        })?;

        self.stop.store(false, Ordering::SeqCst);
        let worker = Worker {
            camera_id: self.camera_id.clone(),
            locator: self.locator.clone(),
            reconnect_interval: self.reconnect_interval,
            latest: self.latest.clone(),
            counters: self.counters.clone(),
            stop: self.stop.clone(),
        };
        let join = std::thread::Builder::new()
            .name(format!("stream-{}", self.camera_id))
            .spawn(move || worker.run(opener))
            .map_err(|e| anyhow!("stream {}: failed to spawn thread: {}", self.camera_id, e))?;
        self.worker = Some(join);
        log::info!("stream {}: started ({})", self.camera_id, self.locator);
        Ok(())
    }

    /// Ask the acquisition thread to exit. Blocking reads observe this too.
    pub fn signal_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Wait until the acquisition thread has exited or `deadline` passes.
    ///
    /// On timeout the handle is kept: `is_running` stays true until the thread
    /// really exits, and a later `join` or `start` reclaims it.
    pub fn join(&mut self, deadline: Instant) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        while !worker.is_finished() {
            if Instant::now() >= deadline {
                self.worker = Some(worker);
                return Err(anyhow!(
                    "stream {}: capture thread did not stop in time",
                    self.camera_id
                ));
            }
            std::thread::sleep(STOP_POLL);
        }
        self.reclaim(worker)?;
        log::info!("stream {}: stopped", self.camera_id);
        Ok(())
    }

    /// Signal and wait, bounded by `timeout`.
    pub fn stop(&mut self, timeout: Duration) -> Result<()> {
        self.signal_stop();
        self.join(Instant::now() + timeout)
    }

    /// Non-blocking read of the latest frame, timestamp and connectivity.
    pub fn latest(&self) -> Arc<FrameSample> {
        self.latest.load()
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            camera_id: self.camera_id.clone(),
            locator: self.locator.clone(),
            frames_captured: self.counters.frames.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            reconnects: self.counters.reconnects.load(Ordering::Relaxed),
            connected: self.latest.load().connected,
            running: self.is_running(),
        }
    }

    fn reclaim(&mut self, worker: JoinHandle<Box<dyn CaptureOpener>>) -> Result<()> {
        let opener = worker
            .join()
            .map_err(|_| anyhow!("stream {}: capture thread panicked", self.camera_id))?;
        self.opener = Some(opener);
        Ok(())
    }
}

impl Drop for StreamSource {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

struct Worker {
    camera_id: String,
    locator: String,
    reconnect_interval: Duration,
    latest: Arc<LatestFrame>,
    counters: Arc<StreamCounters>,
    stop: Arc<AtomicBool>,
}

impl Worker {
    fn run(self, mut opener: Box<dyn CaptureOpener>) -> Box<dyn CaptureOpener> {
        let mut capture: Option<Box<dyn Capture>> = None;
        let mut connected = false;
        let mut ever_connected = false;

        while !self.stop.load(Ordering::SeqCst) {
            if capture.is_none() {
                match opener.open() {
                    Ok(opened) => capture = Some(opened),
                    Err(err) => {
                        log::warn!(
                            "stream {}: open {} failed: {:#}",
                            self.camera_id,
                            self.locator,
                            err
                        );
                        connected = false;
                        self.back_off();
                        continue;
                    }
                }
            }
            let Some(active) = capture.as_mut() else {
                continue;
            };

            match active.read(&self.stop) {
                Ok(Some(frame)) => {
                    self.latest.publish(frame, crate::clock_secs());
                    self.counters.frames.fetch_add(1, Ordering::Relaxed);
                    if !connected {
                        log::info!("stream {}: connected to {}", self.camera_id, self.locator);
                        if ever_connected {
                            self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
                        }
                        connected = true;
                        ever_connected = true;
                    }
                }
                // Interrupted by a stop request; the loop condition exits.
                Ok(None) => {}
                Err(err) => {
                    log::warn!("stream {}: read failed: {:#}", self.camera_id, err);
                    capture = None;
                    connected = false;
                    self.back_off();
                }
            }
        }

        drop(capture);
        self.latest.set_connected(false);
        opener
    }

    fn back_off(&self) {
        self.latest.set_connected(false);
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        wait_unless_stopped(&self.stop, self.reconnect_interval);
    }
}

/// Sleep for `total`, returning early once `stop` is set.
///
/// Returns false when interrupted by `stop`.
pub(crate) fn wait_unless_stopped(stop: &AtomicBool, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(STOP_POLL));
    }
    false
}
