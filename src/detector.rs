use std::sync::{Arc, Mutex, PoisonError};

use crate::Result;
use crate::detection::Detection;
use crate::frame::Frame;

/// Object-detection capability: given a frame, return the objects found in it.
pub trait Detector {
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        (**self).infer(frame)
    }
}

/// Returns the same detections for every frame.
///
/// Handy for demos without a model, and for tests.
#[derive(Debug, Default, Clone)]
pub struct StaticDetector {
    detections: Vec<Detection>,
}

impl StaticDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }
}

impl Detector for StaticDetector {
    fn infer(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        Ok(self.detections.clone())
    }
}

/// One model shared by several pipeline loops; inference calls are serialized.
pub struct SharedDetector<D> {
    inner: Arc<Mutex<D>>,
}

impl<D> Clone for SharedDetector<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D> SharedDetector<D> {
    pub fn new(detector: D) -> Self {
        Self {
            inner: Arc::new(Mutex::new(detector)),
        }
    }
}

impl<D: Detector> Detector for SharedDetector<D> {
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .infer(frame)
    }
}
