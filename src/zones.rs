//! Partition of the frame width into left, center, and right bands.

use serde::Serialize;

use crate::detection::Detection;

/// One of the three vertical bands of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Zone {
    Left,
    Center,
    Right,
}

/// Which bands hold at least one detection center in the current frame.
///
/// Recomputed from scratch every frame; nothing carries over between frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ZoneStatus {
    pub left: bool,
    pub center: bool,
    pub right: bool,
}

impl ZoneStatus {
    pub fn new(left: bool, center: bool, right: bool) -> Self {
        Self {
            left,
            center,
            right,
        }
    }

    pub fn mark(&mut self, zone: Zone) {
        match zone {
            Zone::Left => self.left = true,
            Zone::Center => self.center = true,
            Zone::Right => self.right = true,
        }
    }

    pub fn is_occupied(&self, zone: Zone) -> bool {
        match zone {
            Zone::Left => self.left,
            Zone::Center => self.center,
            Zone::Right => self.right,
        }
    }
}

/// Band boundaries as fractions of the frame width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneClassifier {
    left_boundary: f32,
    right_boundary: f32,
}

impl Default for ZoneClassifier {
    fn default() -> Self {
        Self::new(1.0 / 3.0, 2.0 / 3.0)
    }
}

impl ZoneClassifier {
    /// `left_boundary` and `right_boundary` are fractions of the frame width.
    pub fn new(left_boundary: f32, right_boundary: f32) -> Self {
        Self {
            left_boundary,
            right_boundary,
        }
    }

    /// Assign a horizontal position to a band.
    ///
    /// The lower edge of each band is inclusive: a center exactly on the left boundary is
    /// in the center band, exactly on the right boundary is in the right band.
    pub fn zone_of(&self, frame_width: u32, cx: f32) -> Zone {
        let width = frame_width as f32;
        if cx < width * self.left_boundary {
            Zone::Left
        } else if cx < width * self.right_boundary {
            Zone::Center
        } else {
            Zone::Right
        }
    }

    pub fn classify(&self, frame_width: u32, detections: &[Detection]) -> ZoneStatus {
        let mut status = ZoneStatus::default();
        for det in detections {
            status.mark(self.zone_of(frame_width, det.center_x()));
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(cx: f32) -> Detection {
        Detection::centered_at(cx, 20.0, 0.0, 50.0)
    }

    #[test]
    fn no_detections_leaves_every_band_clear() {
        let status = ZoneClassifier::default().classify(300, &[]);
        assert_eq!(status, ZoneStatus::new(false, false, false));
    }

    #[test]
    fn one_detection_per_band_marks_all_bands() {
        let status = ZoneClassifier::default().classify(300, &[at(50.0), at(150.0), at(250.0)]);
        assert_eq!(status, ZoneStatus::new(true, true, true));
    }

    #[test]
    fn right_only_detection() {
        let status = ZoneClassifier::default().classify(300, &[at(250.0)]);
        assert_eq!(status, ZoneStatus::new(false, false, true));
    }

    #[test]
    fn left_boundary_belongs_to_center() {
        let zones = ZoneClassifier::default();
        assert_eq!(zones.zone_of(300, 100.0), Zone::Center);
        assert_eq!(zones.zone_of(300, 99.99), Zone::Left);
    }

    #[test]
    fn right_boundary_belongs_to_right() {
        let zones = ZoneClassifier::default();
        assert_eq!(zones.zone_of(300, 200.0), Zone::Right);
        assert_eq!(zones.zone_of(300, 199.99), Zone::Center);
    }

    #[test]
    fn boundaries_use_detection_centers_not_edges() {
        // Spans into the left band, but its center is exactly on the boundary.
        let det = Detection::from_corners(50.0, 0.0, 150.0, 10.0);
        let status = ZoneClassifier::default().classify(300, &[det]);
        assert_eq!(status, ZoneStatus::new(false, true, false));
    }

    #[test]
    fn custom_boundaries_are_respected() {
        let zones = ZoneClassifier::new(0.25, 0.75);
        assert_eq!(zones.zone_of(400, 99.0), Zone::Left);
        assert_eq!(zones.zone_of(400, 100.0), Zone::Center);
        assert_eq!(zones.zone_of(400, 300.0), Zone::Right);
    }

    #[test]
    fn multiple_detections_in_one_band_mark_it_once() {
        let status = ZoneClassifier::default().classify(300, &[at(10.0), at(60.0), at(90.0)]);
        assert_eq!(status, ZoneStatus::new(true, false, false));
        assert!(status.is_occupied(Zone::Left));
        assert!(!status.is_occupied(Zone::Center));
    }
}
