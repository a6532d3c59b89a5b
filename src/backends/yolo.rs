use std::path::Path;

use anyhow::{Context, Result, anyhow, ensure};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ort::session::{Session, SessionInputValue};
use ort::value::Tensor;
use tracing::{debug, info};

use crate::detection::Detection;
use crate::detector::Detector;
use crate::frame::Frame;

/// Square input edge expected by YOLOv8-style exports.
pub const INPUT_SIZE: u32 = 640;

/// Gray used to pad letterboxed frames.
const PAD_COLOR: [u8; 3] = [114, 114, 114];

/// COCO class names, indexed by class id.
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// Thresholds for [`YoloDetector`].
#[derive(Debug, Clone, Copy)]
pub struct YoloConfig {
    /// Minimum best-class score for a prediction to count as a detection.
    pub confidence_threshold: f32,
    /// Overlap above which the weaker of two boxes is suppressed.
    pub iou_threshold: f32,
    pub intra_threads: usize,
}

impl Default for YoloConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            intra_threads: num_cpus::get(),
        }
    }
}

/// Object detector backed by a YOLOv8-style ONNX model.
///
/// Expects one `[1, 3, 640, 640]` float input and one `[1, 4 + classes, predictions]`
/// output with boxes in center format. Every class counts as an obstacle.
pub struct YoloDetector {
    session: Session,
    input_name: String,
    cfg: YoloConfig,
}

/// How a frame was fit into the model's square input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl YoloDetector {
    pub fn new(model_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(model_path, YoloConfig::default())
    }

    pub fn with_config(model_path: impl AsRef<Path>, cfg: YoloConfig) -> Result<Self> {
        let model_path = model_path.as_ref();
        ensure!(
            (0.0..=1.0).contains(&cfg.confidence_threshold),
            "confidence threshold must be within 0..=1"
        );
        ensure!(
            (0.0..=1.0).contains(&cfg.iou_threshold),
            "IoU threshold must be within 0..=1"
        );

        let builder = Session::builder()
            .context("failed to create ONNX Runtime session builder")?
            .with_intra_threads(cfg.intra_threads.max(1))
            .context("failed to configure ONNX Runtime threads")?;

        // Falls back to CPU when no CUDA device is available.
        #[cfg(feature = "cuda")]
        let builder = builder
            .with_execution_providers([
                ort::execution_providers::CUDAExecutionProvider::default()
                    .with_device_id(0)
                    .build(),
            ])
            .context("failed to register the CUDA execution provider")?;

        let session = builder
            .commit_from_file(model_path)
            .with_context(|| {
                format!("failed to load YOLO model from '{}'", model_path.display())
            })?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| anyhow!("YOLO model has no inputs"))?;

        info!(model = %model_path.display(), input = %input_name, "YOLO detector loaded");

        Ok(Self {
            session,
            input_name,
            cfg,
        })
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let (input, letterbox) = preprocess(frame);
        let tensor = Tensor::from_array((
            [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
            input.into_boxed_slice(),
        ))
        .context("failed to build YOLO input tensor")?;

        let inputs: Vec<(String, SessionInputValue<'static>)> = vec![(
            self.input_name.clone(),
            SessionInputValue::Owned(tensor.into_dyn()),
        )];

        let detections = {
            let outputs = self
                .session
                .run(inputs)
                .context("failed to run YOLO model")?;
            ensure!(outputs.len() > 0, "YOLO model produced no outputs");

            let (shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .context("YOLO output is not an f32 tensor")?;
            let dims: Vec<i64> = shape.iter().copied().collect();
            postprocess(&dims, data, letterbox, &self.cfg)?
        };

        debug!(count = detections.len(), "YOLO detections");
        Ok(detections)
    }
}

impl Detector for YoloDetector {
    fn infer(&mut self, frame: &Frame) -> crate::Result<Vec<Detection>> {
        self.detect(frame)
            .map_err(|err| crate::Error::Detection(format!("{err:#}")))
    }
}

/// Letterbox `frame` into the square model input and lay it out as normalized CHW floats.
fn preprocess(frame: &Frame) -> (Vec<f32>, Letterbox) {
    let (w, h) = (frame.width().max(1), frame.height().max(1));
    let size = INPUT_SIZE as f32;
    let scale = (size / w as f32).min(size / h as f32);
    let scaled_w = ((w as f32 * scale) as u32).clamp(1, INPUT_SIZE);
    let scaled_h = ((h as f32 * scale) as u32).clamp(1, INPUT_SIZE);

    let resized = imageops::resize(frame.image(), scaled_w, scaled_h, FilterType::Triangle);
    let pad_x = (INPUT_SIZE - scaled_w) / 2;
    let pad_y = (INPUT_SIZE - scaled_h) / 2;

    let mut canvas = RgbImage::from_pixel(INPUT_SIZE, INPUT_SIZE, Rgb(PAD_COLOR));
    imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut input = vec![0.0f32; 3 * plane];
    for (i, pixel) in canvas.pixels().enumerate() {
        for c in 0..3 {
            input[c * plane + i] = pixel[c] as f32 / 255.0;
        }
    }

    (
        input,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    )
}

/// Turn a `[1, 4 + classes, predictions]` output into frame-space detections.
fn postprocess(
    shape: &[i64],
    data: &[f32],
    letterbox: Letterbox,
    cfg: &YoloConfig,
) -> Result<Vec<Detection>> {
    let [1, rows, predictions] = *shape else {
        return Err(anyhow!("unexpected YOLO output shape {shape:?}"));
    };
    ensure!(rows > 4, "YOLO output has no class scores (shape {shape:?})");
    let (rows, predictions) = (rows as usize, predictions as usize);
    ensure!(
        data.len() >= rows * predictions,
        "YOLO output is shorter than its shape {shape:?}"
    );
    let classes = rows - 4;
    let at = |row: usize, i: usize| data[row * predictions + i];

    let mut candidates = Vec::new();
    for i in 0..predictions {
        let (best_class, best_score) = (0..classes)
            .map(|c| (c, at(4 + c, i)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if best_score < cfg.confidence_threshold {
            continue;
        }

        let (cx, cy, bw, bh) = (at(0, i), at(1, i), at(2, i), at(3, i));
        let unbox = |v: f32, pad: f32| (v - pad) / letterbox.scale;
        let det = Detection::from_corners(
            unbox(cx - bw / 2.0, letterbox.pad_x),
            unbox(cy - bh / 2.0, letterbox.pad_y),
            unbox(cx + bw / 2.0, letterbox.pad_x),
            unbox(cy + bh / 2.0, letterbox.pad_y),
        )
        .with_class(best_class, class_name(best_class))
        .with_confidence(best_score);

        candidates.push(det);
    }

    Ok(non_max_suppression(candidates, cfg.iou_threshold))
}

fn class_name(class_id: usize) -> String {
    COCO_CLASSES
        .get(class_id)
        .map(|name| (*name).to_owned())
        .unwrap_or_else(|| format!("class {class_id}"))
}

/// Greedy per-class suppression, strongest first.
fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .unwrap_or(0.0)
            .total_cmp(&a.confidence.unwrap_or(0.0))
    });

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        let suppressed = keep
            .iter()
            .any(|kept| kept.class_id == det.class_id && kept.iou(&det) >= iou_threshold);
        if !suppressed {
            keep.push(det);
        }
    }
    keep
}
