//! Background-subtraction motion detector.
//!
//! Per camera, a running Gaussian (mean, variance) is learned for every luma pixel
//! over a rolling history. A pixel is foreground when its squared deviation from
//! the mean exceeds `var_threshold` variances. The mask is then median filtered,
//! binarised, dilated and split into 8-connected components; components below
//! `min_area` pixels are noise, the rest yield their pixel centroid.

use anyhow::Result;
use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::filter::median_filter;
use imageproc::morphology::dilate;
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::config::VisionSettings;
use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

const FOREGROUND: u8 = 255;
const INITIAL_VARIANCE: f32 = 15.0 * 15.0;
const MIN_VARIANCE: f32 = 4.0;
const MAX_VARIANCE: f32 = 75.0 * 75.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackgroundParams {
    pub history: u32,
    pub var_threshold: f32,
    pub binary_threshold: u8,
    pub median_radius: u32,
    pub dilate_radius: u8,
    pub min_area: u32,
}

impl From<&VisionSettings> for BackgroundParams {
    fn from(settings: &VisionSettings) -> Self {
        Self {
            history: settings.history.max(1),
            var_threshold: settings.var_threshold,
            binary_threshold: settings.binary_threshold,
            median_radius: settings.median_radius,
            dilate_radius: settings.dilate_radius,
            min_area: settings.min_area,
        }
    }
}

struct BackgroundModel {
    width: u32,
    height: u32,
    mean: Vec<f32>,
    variance: Vec<f32>,
    frames: u32,
}

impl BackgroundModel {
    fn seed(luma: &GrayImage) -> Self {
        Self {
            width: luma.width(),
            height: luma.height(),
            mean: luma.as_raw().iter().map(|&v| v as f32).collect(),
            variance: vec![INITIAL_VARIANCE; luma.as_raw().len()],
            frames: 1,
        }
    }

    /// Classify every pixel against the model, then fold the frame into it.
    fn apply(&mut self, luma: &GrayImage, params: &BackgroundParams) -> GrayImage {
        self.frames = self.frames.saturating_add(1);
        let rate = 1.0 / self.frames.min(params.history) as f32;

        let mut mask = GrayImage::new(self.width, self.height);
        let pixels = luma.as_raw().iter();
        let model = self.mean.iter_mut().zip(self.variance.iter_mut());
        for ((&value, (mean, variance)), out) in pixels.zip(model).zip(mask.iter_mut()) {
            let diff = value as f32 - *mean;
            let dist2 = diff * diff;
            if dist2 > params.var_threshold * *variance {
                *out = FOREGROUND;
            }
            *mean += rate * diff;
            *variance = (*variance + rate * (dist2 - *variance)).clamp(MIN_VARIANCE, MAX_VARIANCE);
        }
        mask
    }
}

/// Running-Gaussian background subtractor with connected-component extraction.
pub struct BackgroundBackend {
    params: BackgroundParams,
    model: Option<BackgroundModel>,
}

impl BackgroundBackend {
    pub fn new(params: BackgroundParams) -> Self {
        Self {
            params,
            model: None,
        }
    }

    pub fn from_settings(settings: &VisionSettings) -> Self {
        Self::new(BackgroundParams::from(settings))
    }

    /// Foreground mask for `luma`, updating the background model.
    ///
    /// The first frame (and the first after a resolution change) seeds the model
    /// and yields an empty mask.
    fn foreground(&mut self, luma: &GrayImage) -> GrayImage {
        if let Some(model) = self.model.as_mut() {
            if model.width == luma.width() && model.height == luma.height() {
                return model.apply(luma, &self.params);
            }
            log::debug!(
                "background model reset for {}x{} frames",
                luma.width(),
                luma.height()
            );
        }
        self.model = Some(BackgroundModel::seed(luma));
        GrayImage::new(luma.width(), luma.height())
    }

    fn clean(&self, mask: &GrayImage) -> GrayImage {
        let radius = self.params.median_radius;
        let mut cleaned = median_filter(mask, radius, radius);
        let threshold = self.params.binary_threshold;
        for value in cleaned.iter_mut() {
            *value = if *value >= threshold { FOREGROUND } else { 0 };
        }
        if self.params.dilate_radius > 0 {
            cleaned = dilate(&cleaned, Norm::LInf, self.params.dilate_radius);
        }
        cleaned
    }

    fn components(&self, binary: &GrayImage) -> Vec<Detection> {
        #[derive(Clone, Copy, Default)]
        struct Moments {
            count: u32,
            sum_x: f64,
            sum_y: f64,
        }

        let labels = connected_components(binary, Connectivity::Eight, Luma([0u8]));
        let mut moments: Vec<Moments> = Vec::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label[0] as usize;
            if label == 0 {
                continue;
            }
            if moments.len() < label {
                moments.resize(label, Moments::default());
            }
            let m = &mut moments[label - 1];
            m.count += 1;
            m.sum_x += x as f64;
            m.sum_y += y as f64;
        }

        moments
            .into_iter()
            .filter(|m| m.count > 0 && m.count >= self.params.min_area)
            .map(|m| {
                let n = m.count as f64;
                Detection::with_area(m.sum_x / n, m.sum_y / n, m.count)
            })
            .collect()
    }
}

impl DetectorBackend for BackgroundBackend {
    fn name(&self) -> &'static str {
        "background"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let luma = frame.to_luma();
        let mask = self.foreground(&luma);
        let binary = self.clean(&mask);
        Ok(self.components(&binary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    const W: u32 = 200;
    const H: u32 = 160;

    fn params() -> BackgroundParams {
        BackgroundParams {
            history: 50,
            var_threshold: 16.0,
            binary_threshold: 200,
            median_radius: 2,
            dilate_radius: 2,
            min_area: 100,
        }
    }

    fn background() -> RgbImage {
        RgbImage::from_pixel(W, H, Rgb([70, 70, 70]))
    }

    fn paint_square(img: &mut RgbImage, x0: u32, y0: u32, size: u32) {
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                img.put_pixel(x, y, Rgb([220, 220, 220]));
            }
        }
    }

    fn with_square(x0: u32, y0: u32, size: u32) -> Frame {
        let mut img = background();
        paint_square(&mut img, x0, y0, size);
        Frame::new(img)
    }

    fn trained(backend: &mut BackgroundBackend) {
        for _ in 0..10 {
            assert!(backend.detect(&Frame::new(background())).unwrap().is_empty());
        }
    }

    #[test]
    fn static_scene_yields_no_detections() {
        let mut backend = BackgroundBackend::new(params());
        trained(&mut backend);
        assert!(backend.detect(&Frame::new(background())).unwrap().is_empty());
    }

    #[test]
    fn moving_square_yields_its_centroid() {
        let mut backend = BackgroundBackend::new(params());
        trained(&mut backend);

        let detections = backend.detect(&with_square(100, 60, 40)).unwrap();
        assert_eq!(detections.len(), 1);
        let d = detections[0];
        assert!((d.x - 119.5).abs() < 1.0, "x = {}", d.x);
        assert!((d.y - 79.5).abs() < 1.0, "y = {}", d.y);
        assert!(d.area >= 40 * 40);
    }

    #[test]
    fn components_below_min_area_are_discarded() {
        let mut backend = BackgroundBackend::new(BackgroundParams {
            min_area: 5_000,
            ..params()
        });
        trained(&mut backend);
        let detections = backend.detect(&with_square(100, 60, 40)).unwrap();
        assert!(detections.is_empty());
    }

    #[test]
    fn detections_follow_raster_order() {
        let mut backend = BackgroundBackend::new(params());
        trained(&mut backend);

        let mut img = background();
        paint_square(&mut img, 20, 100, 30);
        paint_square(&mut img, 140, 10, 30);
        let detections = backend.detect(&Frame::new(img)).unwrap();
        assert_eq!(detections.len(), 2);
        // The upper square is labelled first.
        assert!(detections[0].y < detections[1].y);
        assert!(detections[0].x > detections[1].x);
    }

    #[test]
    fn resolution_change_reseeds_the_model() {
        let mut backend = BackgroundBackend::new(params());
        trained(&mut backend);
        let small = Frame::new(RgbImage::from_pixel(50, 40, Rgb([200, 200, 200])));
        assert!(backend.detect(&small).unwrap().is_empty());
        assert!(backend.detect(&small).unwrap().is_empty());
    }
}
