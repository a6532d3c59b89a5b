use serde::Serialize;

/// A single object localization result.
///
/// Coordinates are in frame pixels, `(x1, y1)` top-left and `(x2, y2)` bottom-right.
/// Class and confidence are carried for annotation only; the direction decision looks at
/// nothing but the horizontal center.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub class_id: Option<usize>,
    pub class_name: Option<String>,
    pub confidence: Option<f32>,
}

impl Detection {
    /// A detection with no class or confidence metadata.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            class_id: None,
            class_name: None,
            confidence: None,
        }
    }

    /// A box of the given size whose horizontal center sits at `cx`.
    pub fn centered_at(cx: f32, width: f32, y1: f32, y2: f32) -> Self {
        let half = width / 2.0;
        Self::from_corners(cx - half, y1, cx + half, y2)
    }

    pub fn with_class(mut self, class_id: usize, class_name: impl Into<String>) -> Self {
        self.class_id = Some(class_id);
        self.class_name = Some(class_name.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn center_x(&self) -> f32 {
        (self.x1 + self.x2) / 2.0
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection-over-union with another box.
    pub fn iou(&self, other: &Detection) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_is_midpoint_of_horizontal_edges() {
        let det = Detection::from_corners(10.0, 0.0, 30.0, 5.0);
        assert_eq!(det.center_x(), 20.0);
        assert_eq!(Detection::centered_at(150.0, 40.0, 0.0, 10.0).center_x(), 150.0);
    }

    #[test]
    fn iou_of_identical_boxes_is_one_and_disjoint_is_zero() {
        let a = Detection::from_corners(0.0, 0.0, 10.0, 10.0);
        let b = Detection::from_corners(20.0, 20.0, 30.0, 30.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = Detection::from_corners(0.0, 0.0, 10.0, 10.0);
        let b = Detection::from_corners(5.0, 0.0, 15.0, 10.0);
        // 50 / (100 + 100 - 50)
        assert!((a.iou(&b) - (50.0 / 150.0)).abs() < 1e-6);
    }
}
