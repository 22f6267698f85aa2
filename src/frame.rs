//! Frames and the per-camera "latest sample" slot.
//!
//! - `Frame`: an owned, immutable RGB image produced by a capture backend.
//! - `FrameSample`: what a snapshot reports for one camera (frame, timestamp, connectivity).
//! - `LatestFrame`: the single cell shared between a capture thread and the tick loop.
//!
//! The slot holds an `Arc<FrameSample>` that is replaced wholesale on every update.
//! Readers clone the `Arc` inside a short critical section and never observe a
//! partially written sample. Older frames are dropped, never queued.

use image::{GrayImage, RgbImage};
use std::sync::{Arc, Mutex, PoisonError};

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Decoded video frame (8-bit RGB, row-major, no padding).
#[derive(Clone, Debug)]
pub struct Frame {
    pixels: RgbImage,
}

impl Frame {
    pub fn new(pixels: RgbImage) -> Self {
        Self { pixels }
    }

    /// Build a frame from a tightly packed RGB buffer.
    ///
    /// Returns `None` when the buffer length does not match `width * height * 3`.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        RgbImage::from_raw(width, height, data).map(Self::new)
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.pixels
    }

    /// Luma conversion used by the motion detectors.
    pub fn to_luma(&self) -> GrayImage {
        image::imageops::grayscale(&self.pixels)
    }
}

// ----------------------------------------------------------------------------
// FrameSample
// ----------------------------------------------------------------------------

/// Per-camera view returned by a snapshot.
///
/// `frame` is the last frame ever captured (it survives a disconnect), `timestamp`
/// is its capture time on `crate::clock_secs` (0.0 before the first frame),
/// and `connected` reflects the current state of the acquisition loop.
#[derive(Clone, Debug)]
pub struct FrameSample {
    pub camera_id: String,
    pub frame: Option<Arc<Frame>>,
    pub timestamp: f64,
    pub connected: bool,
}

impl FrameSample {
    /// Initial sample for a camera that has never delivered a frame.
    pub fn empty(camera_id: &str) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            frame: None,
            timestamp: 0.0,
            connected: false,
        }
    }

    /// True when this sample carries a frame from a live stream.
    pub fn is_live(&self) -> bool {
        self.connected && self.frame.is_some()
    }
}

// ----------------------------------------------------------------------------
// LatestFrame: single-slot, latest-wins cell
// ----------------------------------------------------------------------------

/// Latest-wins slot shared between one writer (the capture thread) and any number
/// of readers. Every write installs a fresh immutable sample.
#[derive(Debug)]
pub struct LatestFrame {
    slot: Mutex<Arc<FrameSample>>,
}

impl LatestFrame {
    pub fn new(camera_id: &str) -> Self {
        Self {
            slot: Mutex::new(Arc::new(FrameSample::empty(camera_id))),
        }
    }

    /// Non-blocking read of the current sample (beyond the swap critical section).
    ///
    /// A poisoned lock is recovered: the stored value is always a complete sample.
    pub fn load(&self) -> Arc<FrameSample> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install a freshly captured frame and mark the stream connected.
    pub fn publish(&self, frame: Frame, timestamp: f64) {
        let mut guard = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let next = FrameSample {
            camera_id: guard.camera_id.clone(),
            frame: Some(Arc::new(frame)),
            timestamp,
            connected: true,
        };
        *guard = Arc::new(next);
    }

    /// Flip connectivity, keeping the last known frame and timestamp.
    pub fn set_connected(&self, connected: bool) {
        let mut guard = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.connected == connected {
            return;
        }
        let mut next = FrameSample::clone(&guard);
        next.connected = connected;
        *guard = Arc::new(next);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
