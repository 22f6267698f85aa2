use anyhow::{anyhow, bail, Result};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::config::CameraSettings;
use crate::frame::FrameSample;

use super::stream::{StreamSource, StreamStats};

/// Registry of stream sources, keyed by camera id.
///
/// At most one source exists per camera id. Snapshots read every camera's slot
/// independently; cameras are not synchronised with each other.
pub struct StreamRegistry {
    sources: BTreeMap<String, StreamSource>,
}

impl StreamRegistry {
    /// Build sources for every configured camera.
    ///
    /// All configuration errors are raised here, before any thread is spawned.
    pub fn from_config(cameras: &[CameraSettings]) -> Result<Self> {
        let sources = cameras
            .iter()
            .map(StreamSource::from_settings)
            .collect::<Result<Vec<_>>>()?;
        Self::from_sources(sources)
    }

    /// Assemble a registry from prebuilt sources (custom capture backends, tests).
    pub fn from_sources(sources: impl IntoIterator<Item = StreamSource>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for source in sources {
            let id = source.camera_id().to_string();
            crate::validate_camera_id(&id)?;
            if map.contains_key(&id) {
                bail!("duplicate camera id '{}'", id);
            }
            map.insert(id, source);
        }
        Ok(Self { sources: map })
    }

    /// Start every source. Stops the already-started ones if any spawn fails.
    pub fn start(&mut self) -> Result<()> {
        let mut failure = None;
        for source in self.sources.values_mut() {
            if let Err(err) = source.start() {
                failure = Some(err);
                break;
            }
        }
        if let Some(err) = failure {
            if let Err(stop_err) = self.stop(Duration::from_secs(2)) {
                log::warn!("rollback after failed start: {:#}", stop_err);
            }
            return Err(err);
        }
        log::info!("stream registry: {} camera(s) started", self.sources.len());
        Ok(())
    }

    /// Signal every source, then wait for all of them within one shared deadline.
    pub fn stop(&mut self, timeout: Duration) -> Result<()> {
        for source in self.sources.values() {
            source.signal_stop();
        }
        let deadline = Instant::now() + timeout;
        let mut failures = Vec::new();
        for source in self.sources.values_mut() {
            if let Err(err) = source.join(deadline) {
                log::warn!("{:#}", err);
                failures.push(source.camera_id().to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(
                "streams did not stop cleanly: {}",
                failures.join(", ")
            ))
        }
    }

    /// Latest sample per camera. Never blocks on capture and never fails.
    pub fn snapshot(&self) -> BTreeMap<String, FrameSample> {
        self.sources
            .iter()
            .map(|(id, source)| (id.clone(), FrameSample::clone(&source.latest())))
            .collect()
    }

    pub fn get_stream(&self, camera_id: &str) -> Option<&StreamSource> {
        self.sources.get(camera_id)
    }

    pub fn stream_ids(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    pub fn stats(&self) -> Vec<StreamStats> {
        self.sources.values().map(StreamSource::stats).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
