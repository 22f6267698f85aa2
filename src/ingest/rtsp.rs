//! RTSP capture via GStreamer.
//!
//! The RTSP capture is responsible for:
//! - Building the decode pipeline with the configured transport and latency hint
//! - Handing out one decoded RGB frame per `read`
//! - Reporting bus errors and end-of-stream as read failures
//! - Pulling in short slices so a stop request is seen while the camera stalls
//!
//! The appsink keeps a single buffer and drops older ones, matching the
//! latest-wins policy of the stream slot.

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::config::RtspSettings;
use crate::frame::Frame;

use super::{redact_locator, Capture, CaptureOpener, STOP_POLL};

const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);
const FRAME_TIMEOUT: Duration = Duration::from_millis(1_000);

pub struct RtspOpener {
    settings: RtspSettings,
}

impl RtspOpener {
    pub fn new(settings: RtspSettings) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;
        Ok(Self { settings })
    }

    fn pipeline_description(&self) -> String {
        format!(
            "rtspsrc location={} protocols={} latency={} ! rtph264depay ! h264parse ! \
             avdec_h264 ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink drop=true max-buffers=1 sync=false",
            self.settings.url,
            self.settings.protocol.as_str(),
            self.settings.latency_ms
        )
    }
}

impl CaptureOpener for RtspOpener {
    fn describe(&self) -> String {
        redact_locator(&self.settings.url)
    }

    fn open(&mut self) -> Result<Box<dyn Capture>> {
        let pipeline = gstreamer::parse::launch(&self.pipeline_description())
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;

        Ok(Box::new(RtspCapture {
            pipeline,
            appsink,
            frames: 0,
        }))
    }
}

pub struct RtspCapture {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frames: u64,
}

impl RtspCapture {
    fn poll_bus(&self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(anyhow!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => return Err(anyhow!("gstreamer reached EOS")),
                _ => {}
            }
        }
        Ok(())
    }
}

impl Capture for RtspCapture {
    fn read(&mut self, stop: &AtomicBool) -> Result<Option<Frame>> {
        let timeout = if self.frames == 0 {
            FIRST_FRAME_TIMEOUT
        } else {
            FRAME_TIMEOUT
        };
        let deadline = Instant::now() + timeout;
        let slice = gstreamer::ClockTime::from_mseconds(STOP_POLL.as_millis() as u64);

        loop {
            if stop.load(Ordering::SeqCst) {
                return Ok(None);
            }
            self.poll_bus()?;
            if let Some(sample) = self.appsink.try_pull_sample(slice) {
                let frame = sample_to_frame(&sample)?;
                self.frames += 1;
                return Ok(Some(frame));
            }
            if self.appsink.is_eos() {
                return Err(anyhow!("RTSP stream reached end of stream"));
            }
            if Instant::now() >= deadline {
                return Err(anyhow!("RTSP stream stalled for {:?}", timeout));
            }
        }
    }
}

impl Drop for RtspCapture {
    fn drop(&mut self) {
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("failed to release RTSP pipeline: {}", err);
        }
    }
}

fn sample_to_frame(sample: &gstreamer::Sample) -> Result<Frame> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    let pixels = if stride == row_bytes {
        data.get(..row_bytes * height as usize)
            .context("RTSP buffer is shorter than its caps")?
            .to_vec()
    } else {
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            let end = start + row_bytes;
            pixels.extend_from_slice(
                data.get(start..end)
                    .context("RTSP buffer row is out of bounds")?,
            );
        }
        pixels
    };

    Frame::from_rgb(width, height, pixels).context("RTSP frame has inconsistent dimensions")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RtspProtocol;

    #[test]
    fn pipeline_carries_transport_and_latency() -> Result<()> {
        let opener = RtspOpener::new(RtspSettings {
            url: "rtsp://user:pw@10.0.0.9/live".to_string(),
            protocol: RtspProtocol::Udp,
            latency_ms: 120,
        })?;
        let description = opener.pipeline_description();
        assert!(description.contains("protocols=udp"));
        assert!(description.contains("latency=120"));
        assert!(description.contains("max-buffers=1"));
        assert_eq!(opener.describe(), "rtsp://***@10.0.0.9/live");
        Ok(())
    }
}
