use anyhow::Result;
use std::collections::VecDeque;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Stub backend for testing. Replays scripted detection lists, one per call,
/// then reports nothing.
#[derive(Debug, Default)]
pub struct StubBackend {
    script: VecDeque<Vec<Detection>>,
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(script: impl IntoIterator<Item = Vec<Detection>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            calls: 0,
        }
    }

    /// Number of `detect` calls so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        self.calls += 1;
        Ok(self.script.pop_front().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_backend_replays_script_then_goes_quiet() {
        let frame = Frame::new(image::RgbImage::new(2, 2));
        let mut backend = StubBackend::scripted([
            vec![Detection::new(1.0, 2.0)],
            vec![Detection::new(3.0, 4.0), Detection::new(5.0, 6.0)],
        ]);

        assert_eq!(backend.detect(&frame).unwrap().len(), 1);
        assert_eq!(backend.detect(&frame).unwrap().len(), 2);
        assert!(backend.detect(&frame).unwrap().is_empty());
        assert_eq!(backend.calls(), 3);
    }
}
