use opencv::core::Mat;
use opencv::imgproc;
use opencv::prelude::*;
use opencv::videoio::{
    CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH, VideoCapture,
};
use tracing::{info, warn};

use crate::capture::FrameSource;
use crate::frame::Frame;
use crate::{Error, Result};

/// Requested capture settings. Devices may silently pick the nearest mode they support.
#[derive(Debug, Clone, Copy)]
pub struct CameraConfig {
    pub device_index: i32,
    pub resolution: Option<(u32, u32)>,
    pub fps: Option<f64>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            resolution: None,
            fps: None,
        }
    }
}

/// A local camera read through OpenCV. Frames are converted from BGR to RGB.
pub struct OpenCvCamera {
    capture: VideoCapture,
    device_index: i32,
}

impl OpenCvCamera {
    pub fn open(cfg: CameraConfig) -> Result<Self> {
        let idx = cfg.device_index;
        let mut capture = VideoCapture::new(idx, CAP_ANY)
            .map_err(|err| Error::Capture(format!("failed to open camera {idx}: {err}")))?;

        let opened = capture
            .is_opened()
            .map_err(|err| Error::Capture(format!("camera {idx} not opened: {err}")))?;
        if !opened {
            return Err(Error::Capture(format!("camera {idx} failed to open")));
        }

        if let Some((width, height)) = cfg.resolution {
            set_prop(&mut capture, CAP_PROP_FRAME_WIDTH, width as f64);
            set_prop(&mut capture, CAP_PROP_FRAME_HEIGHT, height as f64);
        }
        if let Some(fps) = cfg.fps {
            set_prop(&mut capture, CAP_PROP_FPS, fps);
        }

        info!(device = idx, "camera opened");
        Ok(Self {
            capture,
            device_index: idx,
        })
    }

    pub fn device_index(&self) -> i32 {
        self.device_index
    }
}

fn set_prop(capture: &mut VideoCapture, prop: i32, value: f64) {
    match capture.set(prop, value) {
        Ok(true) => {}
        Ok(false) => warn!(prop, value, "camera ignored property"),
        Err(err) => warn!(prop, value, error = %err, "failed to set camera property"),
    }
}

impl FrameSource for OpenCvCamera {
    fn read(&mut self) -> Result<Option<Frame>> {
        let mut bgr = Mat::default();
        let grabbed = self
            .capture
            .read(&mut bgr)
            .map_err(|err| Error::Capture(format!("camera read failed: {err}")))?;

        // A failed grab is how devices and files signal the end of the stream.
        if !grabbed || bgr.empty() {
            return Ok(None);
        }

        let mut rgb = Mat::default();
        imgproc::cvt_color(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0)
            .map_err(|err| Error::Capture(format!("color conversion failed: {err}")))?;

        let (width, height) = (rgb.cols() as u32, rgb.rows() as u32);
        let data = rgb
            .data_bytes()
            .map_err(|err| Error::Capture(format!("frame not contiguous: {err}")))?
            .to_vec();

        Frame::from_rgb(width, height, data)
            .map(Some)
            .ok_or_else(|| Error::Capture(format!("unexpected frame layout {width}x{height}")))
    }
}
