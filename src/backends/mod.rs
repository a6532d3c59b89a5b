/// Speech through an external synthesizer program (`espeak-ng`, `say`, ...).
pub mod command_speech;

/// YOLO object detection on ONNX Runtime.
#[cfg(feature = "onnx")]
pub mod yolo;

/// Local cameras through OpenCV.
#[cfg(feature = "camera")]
pub mod opencv_camera;
