//! Per-camera detection and tracking.
//!
//! Each camera gets its own detector instance and tracker, created the first
//! time the camera shows up in a snapshot. Detection is throttled per camera:
//! it runs only when `detection_interval_s` has elapsed (in frame time) since
//! the camera's previous detection. Ticks in between feed the tracker an empty
//! detection list, which only ages tracks.

use anyhow::Result;
use std::collections::BTreeMap;

use crate::config::VisionSettings;
use crate::detect::{BackendRegistry, Detection, DetectorBackend, DetectorFactory};
use crate::frame::FrameSample;
use crate::tracker::{PersonState, Tracker};

struct CameraVision {
    detector: Box<dyn DetectorBackend>,
    tracker: Tracker,
    last_detection: Option<f64>,
    detector_failures: u64,
}

impl CameraVision {
    fn detection_due(&self, frame_ts: f64, interval_s: f64) -> bool {
        match self.last_detection {
            None => true,
            Some(last) => frame_ts - last >= interval_s,
        }
    }
}

pub struct VisionEngine {
    settings: VisionSettings,
    factory: DetectorFactory,
    cameras: BTreeMap<String, CameraVision>,
}

impl VisionEngine {
    /// Resolve the configured backend. An unknown backend name is a startup error.
    pub fn new(settings: VisionSettings, backends: &BackendRegistry) -> Result<Self> {
        let factory = backends.factory(&settings.backend)?;
        Ok(Self::with_factory(settings, factory))
    }

    /// Build with an explicit detector factory, bypassing the registry.
    pub fn with_factory(settings: VisionSettings, factory: DetectorFactory) -> Self {
        Self {
            settings,
            factory,
            cameras: BTreeMap::new(),
        }
    }

    pub fn settings(&self) -> &VisionSettings {
        &self.settings
    }

    /// Live track count for a camera, if it has been seen.
    pub fn track_count(&self, camera_id: &str) -> Option<usize> {
        self.cameras.get(camera_id).map(|camera| camera.tracker.len())
    }

    /// Run detection (when due) and tracking for every camera in `frames`.
    ///
    /// `now` is the tick time; cameras without a live frame age their tracks
    /// against it so that they drain after `max_lost_s`.
    pub fn process(
        &mut self,
        frames: &BTreeMap<String, FrameSample>,
        now: f64,
    ) -> BTreeMap<String, Vec<PersonState>> {
        let interval_s = self.settings.detection_interval_s;
        let mut results = BTreeMap::new();
        for (camera_id, sample) in frames {
            let camera = self.camera(camera_id);

            match sample.frame.as_deref() {
                Some(frame) if sample.connected => {
                    let ts = sample.timestamp;
                    let mut detections: Vec<Detection> = Vec::new();
                    if camera.detection_due(ts, interval_s) {
                        camera.last_detection = Some(ts);
                        match camera.detector.detect(frame) {
                            Ok(found) => detections = found,
                            Err(err) => {
                                camera.detector_failures += 1;
                                log::warn!(
                                    "camera {}: {} detector failed: {:#}",
                                    camera_id,
                                    camera.detector.name(),
                                    err
                                );
                            }
                        }
                    }
                    camera.tracker.update(&detections, ts);
                }
                _ => {
                    camera.tracker.update(&[], now);
                }
            }

            results.insert(camera_id.clone(), camera.tracker.states());
        }
        results
    }

    fn camera(&mut self, camera_id: &str) -> &mut CameraVision {
        let settings = &self.settings;
        let factory = &self.factory;
        self.cameras
            .entry(camera_id.to_string())
            .or_insert_with(|| {
                let mut detector = factory(settings);
                if let Err(err) = detector.warm_up() {
                    log::warn!("camera {}: detector warm-up failed: {:#}", camera_id, err);
                }
                log::debug!("camera {}: {} detector ready", camera_id, detector.name());
                CameraVision {
                    detector,
                    tracker: Tracker::new(settings.tracker),
                    last_detection: None,
                    detector_failures: 0,
                }
            })
    }

    /// Detector failures recorded for a camera so far.
    pub fn detector_failures(&self, camera_id: &str) -> u64 {
        self.cameras
            .get(camera_id)
            .map(|camera| camera.detector_failures)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubBackend;
    use crate::frame::Frame;
    use crate::tracker::TrackId;
    use anyhow::anyhow;
    use std::sync::{Arc, Mutex};

    fn settings() -> VisionSettings {
        let mut settings = VisionSettings::default();
        settings.backend = "stub".to_string();
        settings.detection_interval_s = 0.2;
        settings.tracker.max_lost_s = 1.0;
        settings
    }

    fn live(camera: &str, ts: f64) -> FrameSample {
        FrameSample {
            camera_id: camera.to_string(),
            frame: Some(Arc::new(Frame::new(image::RgbImage::new(4, 4)))),
            timestamp: ts,
            connected: true,
        }
    }

    fn snapshot(samples: Vec<FrameSample>) -> BTreeMap<String, FrameSample> {
        samples
            .into_iter()
            .map(|sample| (sample.camera_id.clone(), sample))
            .collect()
    }

    /// Engine whose every camera replays the same script.
    fn scripted(script: Vec<Vec<Detection>>) -> VisionEngine {
        let script = Arc::new(script);
        VisionEngine::with_factory(
            settings(),
            Arc::new(move |_: &VisionSettings| {
                Box::new(StubBackend::scripted(script.iter().cloned())) as Box<dyn DetectorBackend>
            }),
        )
    }

    struct Failing;

    impl DetectorBackend for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            Err(anyhow!("backend unavailable"))
        }
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let mut settings = settings();
        settings.backend = "nope".to_string();
        assert!(VisionEngine::new(settings, &BackendRegistry::with_builtin()).is_err());
    }

    #[test]
    fn detections_become_tracks_per_camera() {
        let mut engine = scripted(vec![vec![Detection::new(10.0, 10.0)]]);
        let out = engine.process(&snapshot(vec![live("a", 1.0), live("b", 1.0)]), 1.0);

        assert_eq!(out.len(), 2);
        assert_eq!(out["a"].len(), 1);
        assert_eq!(out["b"].len(), 1);
        // Ids are per camera.
        assert_eq!(out["a"][0].track_id, TrackId(1));
        assert_eq!(out["b"][0].track_id, TrackId(1));
    }

    #[test]
    fn detection_is_throttled_by_frame_time() {
        let calls = Arc::new(Mutex::new(0u32));
        let counter = calls.clone();
        let mut engine = VisionEngine::with_factory(
            settings(),
            Arc::new(move |_: &VisionSettings| {
                *counter.lock().unwrap() += 1;
                Box::new(StubBackend::scripted([
                    vec![Detection::new(10.0, 10.0)],
                    vec![Detection::new(12.0, 10.0)],
                ])) as Box<dyn DetectorBackend>
            }),
        );

        engine.process(&snapshot(vec![live("a", 1.0)]), 1.0);
        // 0.1 s later: not due, the track is carried forward untouched.
        let out = engine.process(&snapshot(vec![live("a", 1.1)]), 1.1);
        assert_eq!(out["a"][0].position, (10.0, 10.0));
        // Past the interval: due again.
        let out = engine.process(&snapshot(vec![live("a", 1.25)]), 1.25);
        assert_eq!(out["a"][0].position, (12.0, 10.0));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn stale_frame_is_not_detected_twice() {
        let mut engine = scripted(vec![
            vec![Detection::new(10.0, 10.0)],
            vec![Detection::new(200.0, 200.0)],
        ]);
        engine.process(&snapshot(vec![live("a", 1.0)]), 1.0);
        let out = engine.process(&snapshot(vec![live("a", 1.0)]), 5.0);
        assert_eq!(out["a"].len(), 1);
    }

    #[test]
    fn disconnected_camera_drains_its_tracks() {
        let mut engine = scripted(vec![vec![Detection::new(10.0, 10.0)]]);
        engine.process(&snapshot(vec![live("a", 1.0)]), 1.0);

        let mut gone = live("a", 1.0);
        gone.connected = false;
        let out = engine.process(&snapshot(vec![gone.clone()]), 1.5);
        assert_eq!(out["a"].len(), 1);
        let out = engine.process(&snapshot(vec![gone]), 2.5);
        assert!(out["a"].is_empty());
        assert_eq!(engine.track_count("a"), Some(0));
    }

    #[test]
    fn never_connected_camera_yields_no_people() {
        let mut engine = scripted(vec![]);
        let out = engine.process(&snapshot(vec![FrameSample::empty("cold")]), 3.0);
        assert!(out["cold"].is_empty());
    }

    #[test]
    fn detector_failure_counts_as_zero_detections() {
        let mut engine = VisionEngine::with_factory(
            settings(),
            Arc::new(|_: &VisionSettings| Box::new(Failing) as Box<dyn DetectorBackend>),
        );
        let out = engine.process(&snapshot(vec![live("a", 1.0)]), 1.0);
        assert!(out["a"].is_empty());
        assert_eq!(engine.detector_failures("a"), 1);
    }
}
