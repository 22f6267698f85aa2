//! Frame acquisition.
//!
//! This module provides:
//! - Capture backends: synthetic scenes (testing, demos) and RTSP via GStreamer
//!   (feature: rtsp-gstreamer)
//! - `StreamSource`: one background acquisition loop per camera with reconnect
//! - `StreamRegistry`: the set of sources, fanned-out start/stop and snapshots
//!
//! The acquisition layer is responsible for:
//! - Keeping only the most recent frame per camera (drops, not queues)
//! - Recovering locally from open/read failures
//!
//! The acquisition layer MUST NOT:
//! - Surface runtime capture failures to the tick loop
//! - Block the tick loop beyond the latest-frame swap

use anyhow::Result;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use crate::config::{CameraSettings, Transport};
use crate::frame::Frame;

pub mod registry;
#[cfg(feature = "rtsp-gstreamer")]
pub mod rtsp;
pub mod stream;
pub mod synthetic;

pub use registry::StreamRegistry;
#[cfg(feature = "rtsp-gstreamer")]
pub use rtsp::RtspOpener;
pub use stream::{StreamSource, StreamStats};
pub use synthetic::SyntheticOpener;

/// Longest a blocking capture call may go without checking its stop flag.
pub const STOP_POLL: Duration = Duration::from_millis(20);

/// An open capture handle. Dropping it releases the underlying resource.
pub trait Capture: Send {
    /// Block until the next frame is decoded. Errors mean the stream is lost.
    ///
    /// Implementations wait in slices no longer than `STOP_POLL` and return
    /// `Ok(None)` once `stop` is set.
    fn read(&mut self, stop: &AtomicBool) -> Result<Option<Frame>>;
}

/// Opens captures for one camera; called again after every failure.
pub trait CaptureOpener: Send {
    /// Human-readable locator for logs. Must not include credentials.
    fn describe(&self) -> String;

    /// Attempt to open the stream.
    fn open(&mut self) -> Result<Box<dyn Capture>>;
}

/// Build the opener for a configured camera.
///
/// Errors here are configuration errors (e.g. a transport not compiled in) and
/// are fatal at startup.
pub fn opener_for(settings: &CameraSettings) -> Result<Box<dyn CaptureOpener>> {
    match &settings.transport {
        Transport::Synthetic(synthetic) => {
            Ok(Box::new(SyntheticOpener::new(&settings.id, synthetic.clone())))
        }
        #[cfg(feature = "rtsp-gstreamer")]
        Transport::Rtsp(rtsp) => Ok(Box::new(RtspOpener::new(rtsp.clone())?)),
        #[cfg(not(feature = "rtsp-gstreamer"))]
        Transport::Rtsp(_) => anyhow::bail!(
            "camera '{}': rtsp transport requires the rtsp-gstreamer feature",
            settings.id
        ),
    }
}

/// Strip `user:password@` from a URL before it reaches a log line.
///
/// Only the authority (between `://` and the first `/`, `?` or `#`) can carry
/// credentials; an `@` in the path is left alone.
pub(crate) fn redact_locator(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{}://***@{}", &url[..scheme_end], &rest[at + 1..]),
        None => url.to_string(),
    }
}
