//! Visual feedback: detection boxes and the current direction drawn onto a copy of the frame.
//!
//! Drawing goes through OpenCV's `imgproc` on a `Mat` view of the frame's RGB bytes, so all
//! colors here are given in RGB order.

use opencv::core::{Mat, Point, Scalar};
use opencv::imgproc;
use opencv::prelude::*;

use crate::detection::Detection;
use crate::direction::Direction;
use crate::frame::Frame;
use crate::{Error, Result};

/// Colors and placement used by [`FrameAnnotator`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnotateStyle {
    pub box_color: [u8; 3],
    pub box_thickness: i32,
    /// Scale of the `class confidence` text drawn above each box.
    pub class_label_scale: f64,
    pub label_color: [u8; 3],
    /// Bottom-left corner of the direction label's first character.
    pub label_origin: (i32, i32),
    pub label_scale: f64,
    pub label_thickness: i32,
}

impl Default for AnnotateStyle {
    fn default() -> Self {
        Self {
            box_color: [0, 255, 0],
            box_thickness: 2,
            class_label_scale: 0.5,
            label_color: [255, 0, 0],
            label_origin: (10, 30),
            label_scale: 1.0,
            label_thickness: 2,
        }
    }
}

/// Draws detections and the direction label. Stateless; the input frame is never modified.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameAnnotator {
    style: AnnotateStyle,
}

impl FrameAnnotator {
    pub fn new(style: AnnotateStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> &AnnotateStyle {
        &self.style
    }

    pub fn annotate(
        &self,
        frame: &Frame,
        detections: &[Detection],
        direction: Direction,
    ) -> Result<Frame> {
        let (width, height) = (frame.width(), frame.height());
        if width == 0 || height == 0 {
            return Ok(frame.clone());
        }

        let data = self
            .draw(frame, detections, direction)
            .map_err(|err| Error::Annotation(err.to_string()))?;

        Frame::from_rgb(width, height, data).ok_or_else(|| {
            Error::Annotation(format!("drawing changed the frame layout ({width}x{height})"))
        })
    }

    fn draw(
        &self,
        frame: &Frame,
        detections: &[Detection],
        direction: Direction,
    ) -> opencv::Result<Vec<u8>> {
        let flat = Mat::from_slice(frame.as_rgb())?;
        let mut canvas = flat.reshape(3, frame.height() as i32)?.try_clone()?;

        let style = &self.style;
        let box_color = scalar(style.box_color);

        for det in detections {
            let (x1, y1) = (det.x1.round() as i32, det.y1.round() as i32);
            let (x2, y2) = (det.x2.round() as i32, det.y2.round() as i32);
            imgproc::rectangle_points(
                &mut canvas,
                Point::new(x1, y1),
                Point::new(x2, y2),
                box_color,
                style.box_thickness,
                imgproc::LINE_8,
                0,
            )?;

            if let Some(text) = detection_label(det) {
                imgproc::put_text(
                    &mut canvas,
                    &text,
                    Point::new(x1, (y1 - 6).max(12)),
                    imgproc::FONT_HERSHEY_SIMPLEX,
                    style.class_label_scale,
                    box_color,
                    1,
                    imgproc::LINE_8,
                    false,
                )?;
            }
        }

        let (x, y) = style.label_origin;
        imgproc::put_text(
            &mut canvas,
            &label_text(direction),
            Point::new(x, y),
            imgproc::FONT_HERSHEY_SIMPLEX,
            style.label_scale,
            scalar(style.label_color),
            style.label_thickness,
            imgproc::LINE_8,
            false,
        )?;

        Ok(canvas.data_bytes()?.to_vec())
    }
}

/// The text rendered on every annotated frame.
pub fn label_text(direction: Direction) -> String {
    format!("Direction: {}", direction.label())
}

/// `"<class> <confidence>"` for a detection, using whichever parts it carries.
pub fn detection_label(det: &Detection) -> Option<String> {
    match (det.class_name.as_deref(), det.confidence) {
        (Some(name), Some(conf)) => Some(format!("{name} {conf:.2}")),
        (Some(name), None) => Some(name.to_owned()),
        (None, Some(conf)) => Some(format!("{conf:.2}")),
        (None, None) => None,
    }
}

fn scalar([r, g, b]: [u8; 3]) -> Scalar {
    Scalar::new(r as f64, g as f64, b as f64, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::Range;

    const BG: [u8; 3] = [0, 0, 0];
    const GREEN: [u8; 3] = [0, 255, 0];
    const RED: [u8; 3] = [255, 0, 0];

    fn pixel(frame: &Frame, x: u32, y: u32) -> [u8; 3] {
        frame.image().get_pixel(x, y).0
    }

    fn count_in(frame: &Frame, xs: Range<u32>, ys: Range<u32>, color: [u8; 3]) -> usize {
        ys.flat_map(|y| xs.clone().map(move |x| (x, y)))
            .filter(|&(x, y)| pixel(frame, x, y) == color)
            .count()
    }

    #[test]
    fn boxes_are_outlined_and_interior_left_alone() -> anyhow::Result<()> {
        let frame = Frame::filled(200, 200, BG);
        let det = Detection::from_corners(50.0, 100.0, 150.0, 180.0);
        let out = FrameAnnotator::default().annotate(&frame, &[det], Direction::Forward)?;

        assert_eq!(pixel(&out, 50, 140), GREEN);
        assert_eq!(pixel(&out, 150, 140), GREEN);
        assert_eq!(pixel(&out, 100, 100), GREEN);
        assert_eq!(pixel(&out, 100, 180), GREEN);
        assert_eq!(pixel(&out, 100, 140), BG);
        Ok(())
    }

    #[test]
    fn input_frame_is_not_modified() -> anyhow::Result<()> {
        let frame = Frame::filled(100, 60, BG);
        let det = Detection::from_corners(10.0, 10.0, 50.0, 50.0);
        let out = FrameAnnotator::default().annotate(&frame, &[det], Direction::Stop)?;
        assert!(frame.as_rgb().iter().all(|b| *b == 0));
        assert_eq!((out.width(), out.height()), (100, 60));
        Ok(())
    }

    #[test]
    fn direction_label_is_drawn_in_red_near_the_origin() -> anyhow::Result<()> {
        let frame = Frame::filled(400, 100, BG);
        let out = FrameAnnotator::default().annotate(&frame, &[], Direction::Left)?;

        assert!(count_in(&out, 10..300, 5..40, RED) > 0, "no label pixels drawn");
        assert_eq!(count_in(&out, 0..400, 50..100, RED), 0);
        Ok(())
    }

    #[test]
    fn different_directions_render_differently() -> anyhow::Result<()> {
        let frame = Frame::filled(400, 60, BG);
        let annotator = FrameAnnotator::default();
        let left = annotator.annotate(&frame, &[], Direction::Left)?;
        let right = annotator.annotate(&frame, &[], Direction::Right)?;
        assert_ne!(left, right);
        Ok(())
    }

    #[test]
    fn class_and_confidence_are_drawn_above_the_box() -> anyhow::Result<()> {
        let frame = Frame::filled(300, 200, BG);
        let annotator = FrameAnnotator::default();

        let bare = Detection::from_corners(50.0, 100.0, 250.0, 180.0);
        let labelled = bare.clone().with_class(0, "person").with_confidence(0.87);

        let plain = annotator.annotate(&frame, &[bare], Direction::Forward)?;
        let tagged = annotator.annotate(&frame, &[labelled], Direction::Forward)?;

        assert_eq!(count_in(&plain, 50..250, 60..97, GREEN), 0);
        assert!(count_in(&tagged, 50..250, 60..97, GREEN) > 0);
        Ok(())
    }

    #[test]
    fn off_frame_and_oversized_boxes_do_not_panic() -> anyhow::Result<()> {
        let frame = Frame::filled(20, 20, BG);
        let dets = [
            Detection::from_corners(-50.0, -50.0, -10.0, -10.0),
            Detection::from_corners(100.0, 100.0, 200.0, 200.0),
            Detection::from_corners(-5.0, -5.0, 500.0, 500.0),
            Detection::from_corners(5.0, 5.0, 5.0, 5.0),
            Detection::from_corners(-5.0, -5.0, 12.0, 12.0).with_class(2, "car"),
        ];
        let out = FrameAnnotator::default().annotate(&frame, &dets, Direction::Stop)?;
        // The partly visible box keeps its on-frame corner.
        assert_eq!(pixel(&out, 12, 12), GREEN);
        Ok(())
    }

    #[test]
    fn label_texts() {
        assert_eq!(label_text(Direction::Forward), "Direction: Move Forward");

        let det = Detection::from_corners(0.0, 0.0, 1.0, 1.0);
        assert_eq!(detection_label(&det), None);
        assert_eq!(
            detection_label(&det.clone().with_class(0, "person").with_confidence(0.876)),
            Some("person 0.88".to_owned())
        );
        assert_eq!(detection_label(&det.with_confidence(0.5)), Some("0.50".to_owned()));
    }
}
