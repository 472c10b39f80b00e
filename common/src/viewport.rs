use serde::{Deserialize, Serialize};

/// Position as fractions of the maze viewport, identical on every device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn clamped(self) -> Self {
        Self::new(self.x.clamp(0.0, 1.0), self.y.clamp(0.0, 1.0))
    }
}

/// Position in one device's screen pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Coordinate transforms exposed by the maze renderer.
///
/// `screen_to_normalized` returns `None` while the maze has not been laid out yet,
/// in which case callers must not put anything on the network.
pub trait MazeViewport: Send + Sync {
    fn screen_to_normalized(&self, point: ScreenPoint) -> Option<NormalizedPoint>;
    fn normalized_to_screen(&self, point: NormalizedPoint) -> ScreenPoint;
}

/// Axis-aligned rectangle the maze occupies on screen
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub offset_x: f64,
    pub offset_y: f64,
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub const fn new(offset_x: f64, offset_y: f64, width: f64, height: f64) -> Self {
        Self { offset_x, offset_y, width, height }
    }

    pub fn is_laid_out(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    pub fn contains(&self, point: ScreenPoint) -> bool {
        point.x >= self.offset_x
            && point.y >= self.offset_y
            && point.x <= self.offset_x + self.width
            && point.y <= self.offset_y + self.height
    }
}

impl MazeViewport for Viewport {
    fn screen_to_normalized(&self, point: ScreenPoint) -> Option<NormalizedPoint> {
        if !self.is_laid_out() {
            return None;
        }
        Some(NormalizedPoint::new(
            (point.x - self.offset_x) / self.width,
            (point.y - self.offset_y) / self.height,
        ))
    }

    fn normalized_to_screen(&self, point: NormalizedPoint) -> ScreenPoint {
        ScreenPoint::new(
            self.offset_x + point.x * self.width,
            self.offset_y + point.y * self.height,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn test_round_trip_within_bounds() {
        let viewport = Viewport::new(24.0, 180.0, 1032.0, 1400.0);
        let points = [
            ScreenPoint::new(24.0, 180.0),
            ScreenPoint::new(1056.0, 1580.0),
            ScreenPoint::new(333.3, 901.7),
            ScreenPoint::new(540.0, 960.0),
        ];

        for point in points {
            assert!(viewport.contains(point));
            let normalized = viewport.screen_to_normalized(point).unwrap();
            assert!((0.0..=1.0).contains(&normalized.x));
            assert!((0.0..=1.0).contains(&normalized.y));
            let back = viewport.normalized_to_screen(normalized);
            assert!((back.x - point.x).abs() < EPSILON, "{:?} -> {:?}", point, back);
            assert!((back.y - point.y).abs() < EPSILON, "{:?} -> {:?}", point, back);
        }
    }

    #[test]
    fn test_same_normalized_point_on_different_devices() {
        let phone = Viewport::new(0.0, 100.0, 720.0, 1000.0);
        let tablet = Viewport::new(50.0, 0.0, 1600.0, 2200.0);

        let normalized = phone.screen_to_normalized(ScreenPoint::new(360.0, 600.0)).unwrap();
        let on_tablet = tablet.normalized_to_screen(normalized);

        assert!((on_tablet.x - 850.0).abs() < EPSILON);
        assert!((on_tablet.y - 1100.0).abs() < EPSILON);
    }

    #[test]
    fn test_not_laid_out_has_no_normalized_coordinates() {
        let viewport = Viewport::new(0.0, 0.0, 0.0, 0.0);
        assert!(viewport.screen_to_normalized(ScreenPoint::new(1.0, 1.0)).is_none());
    }
}
