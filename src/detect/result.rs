/// A motion-derived candidate point, prior to track association.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    /// Centroid in pixel coordinates.
    pub x: f64,
    pub y: f64,
    /// Foreground pixel count of the component the centroid came from.
    pub area: u32,
}

impl Detection {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, area: 0 }
    }

    pub fn with_area(x: f64, y: f64, area: u32) -> Self {
        Self { x, y, area }
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}
