//! Synthetic capture for tests and camera-less runs.
//!
//! Renders a few bright "walkers" drifting across a noisy grey background at the
//! configured frame rate. Walkers bounce off the frame edges so motion never stops.

use anyhow::{bail, Result};
use image::{Rgb, RgbImage};
use rand::Rng;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use crate::config::SyntheticSettings;
use crate::frame::Frame;

use super::stream::wait_unless_stopped;
use super::{Capture, CaptureOpener};

const BACKGROUND_LEVEL: i16 = 70;
const BACKGROUND_NOISE: i16 = 3;
const WALKER_LEVEL: u8 = 220;
const WALKER_WIDTH: u32 = 24;
const WALKER_HEIGHT: u32 = 48;
const WALKER_MAX_SPEED: f32 = 60.0;

pub struct SyntheticOpener {
    camera_id: String,
    settings: SyntheticSettings,
}

impl SyntheticOpener {
    pub fn new(camera_id: &str, settings: SyntheticSettings) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            settings,
        }
    }
}

impl CaptureOpener for SyntheticOpener {
    fn describe(&self) -> String {
        format!("synthetic://{}", self.camera_id)
    }

    fn open(&mut self) -> Result<Box<dyn Capture>> {
        Ok(Box::new(SyntheticCapture::new(self.settings.clone())))
    }
}

#[derive(Clone, Copy, Debug)]
struct Walker {
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
}

pub struct SyntheticCapture {
    settings: SyntheticSettings,
    walkers: Vec<Walker>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticCapture {
    pub fn new(settings: SyntheticSettings) -> Self {
        let mut rng = rand::thread_rng();
        let max_x = settings.width.saturating_sub(WALKER_WIDTH).max(1) as f32;
        let max_y = settings.height.saturating_sub(WALKER_HEIGHT).max(1) as f32;
        let walkers = (0..settings.walkers)
            .map(|_| Walker {
                x: rng.gen_range(0.0..max_x),
                y: rng.gen_range(0.0..max_y),
                vx: rng.gen_range(-WALKER_MAX_SPEED..WALKER_MAX_SPEED),
                vy: rng.gen_range(-WALKER_MAX_SPEED..WALKER_MAX_SPEED),
            })
            .collect();
        Self {
            settings,
            walkers,
            frame_count: 0,
            last_frame_at: None,
        }
    }

    fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.settings.fps.max(1) as f64)
    }

    fn advance(&mut self, dt: f32) {
        let max_x = self.settings.width.saturating_sub(WALKER_WIDTH) as f32;
        let max_y = self.settings.height.saturating_sub(WALKER_HEIGHT) as f32;
        for walker in &mut self.walkers {
            walker.x += walker.vx * dt;
            walker.y += walker.vy * dt;
            if walker.x < 0.0 || walker.x > max_x {
                walker.vx = -walker.vx;
                walker.x = walker.x.clamp(0.0, max_x);
            }
            if walker.y < 0.0 || walker.y > max_y {
                walker.vy = -walker.vy;
                walker.y = walker.y.clamp(0.0, max_y);
            }
        }
    }

    fn render(&self) -> RgbImage {
        let mut rng = rand::thread_rng();
        let mut pixels = RgbImage::from_fn(self.settings.width, self.settings.height, |_, _| {
            let level =
                (BACKGROUND_LEVEL + rng.gen_range(-BACKGROUND_NOISE..=BACKGROUND_NOISE)) as u8;
            Rgb([level, level, level])
        });
        for walker in &self.walkers {
            let x0 = walker.x.max(0.0) as u32;
            let y0 = walker.y.max(0.0) as u32;
            for y in y0..(y0 + WALKER_HEIGHT).min(self.settings.height) {
                for x in x0..(x0 + WALKER_WIDTH).min(self.settings.width) {
                    pixels.put_pixel(x, y, Rgb([WALKER_LEVEL, WALKER_LEVEL, WALKER_LEVEL]));
                }
            }
        }
        pixels
    }
}

impl Capture for SyntheticCapture {
    fn read(&mut self, stop: &AtomicBool) -> Result<Option<Frame>> {
        let period = self.frame_period();
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < period && !wait_unless_stopped(stop, period - elapsed) {
                return Ok(None);
            }
        }
        self.last_frame_at = Some(Instant::now());
        self.frame_count += 1;

        if let Some(every) = self.settings.dropout_every {
            if self.frame_count % every == 0 {
                bail!("synthetic dropout at frame {}", self.frame_count);
            }
        }

        self.advance(period.as_secs_f32());
        Ok(Some(Frame::new(self.render())))
    }
}
