use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait: one frame in, a set of candidate points out.
///
/// A backend instance belongs to exactly one camera and may keep per-camera state
/// (e.g. a learned background) between calls. Backends must not retain the frame
/// beyond the `detect` call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// The order of the returned points is significant: the tracker assigns
    /// detections greedily in this order.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
