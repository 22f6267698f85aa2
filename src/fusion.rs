//! Cross-camera feature fusion.
//!
//! Every tick flattens all cameras' person states and recomputes the raw
//! features from scratch. Movement energy and the two ratios are then
//! exponentially smoothed against the previous smoothed value; counts pass
//! through unsmoothed. The smoothed state is a plain value owned by the
//! caller and threaded through `FeatureFusion::update`.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::FusionSettings;
use crate::tracker::PersonState;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct GlobalFeatures {
    pub total_people: usize,
    pub movement_energy: f64,
    pub stationary_ratio: f64,
    pub device_use_ratio: f64,
    /// Velocity in `[velocity_slow, velocity_medium)`.
    pub slow_count: usize,
    /// Velocity in `[velocity_medium, velocity_fast)`.
    pub medium_count: usize,
    /// Velocity at or above `velocity_fast`.
    pub fast_count: usize,
}

pub struct FeatureFusion {
    settings: FusionSettings,
}

impl FeatureFusion {
    pub fn new(settings: FusionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FusionSettings {
        &self.settings
    }

    /// Raw (unsmoothed) features for one tick. Order-independent.
    pub fn aggregate<'a, I>(&self, people: I) -> GlobalFeatures
    where
        I: IntoIterator<Item = &'a PersonState>,
    {
        let s = &self.settings;
        let mut raw = GlobalFeatures::default();
        let mut energy = 0.0;
        let mut stationary = 0usize;
        let mut device_use = 0usize;

        for person in people {
            raw.total_people += 1;
            energy += person.velocity;
            stationary += usize::from(person.stationary);
            device_use += usize::from(person.device_use);

            let v = person.velocity;
            if v >= s.velocity_fast {
                raw.fast_count += 1;
            } else if v >= s.velocity_medium {
                raw.medium_count += 1;
            } else if v >= s.velocity_slow {
                raw.slow_count += 1;
            }
        }

        raw.movement_energy = energy.min(s.max_energy);
        if raw.total_people > 0 {
            let total = raw.total_people as f64;
            raw.stationary_ratio = stationary as f64 / total;
            raw.device_use_ratio = device_use as f64 / total;
        }
        raw
    }

    /// Blend `current` into `previous`; counts are taken from `current` as-is.
    pub fn smooth(&self, previous: &GlobalFeatures, current: &GlobalFeatures) -> GlobalFeatures {
        let a = self.settings.ema_alpha;
        let ema = |cur: f64, prev: f64| a * cur + (1.0 - a) * prev;
        GlobalFeatures {
            movement_energy: ema(current.movement_energy, previous.movement_energy),
            stationary_ratio: ema(current.stationary_ratio, previous.stationary_ratio),
            device_use_ratio: ema(current.device_use_ratio, previous.device_use_ratio),
            ..*current
        }
    }

    /// One fusion step: aggregate every camera's states, then smooth against `previous`.
    ///
    /// Start from `GlobalFeatures::default()` on the first tick.
    pub fn update(
        &self,
        previous: &GlobalFeatures,
        results: &BTreeMap<String, Vec<PersonState>>,
    ) -> GlobalFeatures {
        let raw = self.aggregate(results.values().flatten());
        self.smooth(previous, &raw)
    }
}
