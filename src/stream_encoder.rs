//! Outbound stream framing: JPEG payloads wrapped in `multipart/x-mixed-replace` chunks.

use std::io::Write;

use image::codecs::jpeg::JpegEncoder;

use crate::Result;
use crate::frame::Frame;

/// Boundary token separating chunks.
pub const BOUNDARY: &str = "frame";

/// HTTP content type for a stream of [`multipart_chunk`]s.
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Sink for annotated frames, in frame order.
pub trait FrameEncoder {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

impl<E: FrameEncoder + ?Sized> FrameEncoder for &mut E {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        (**self).write_frame(frame)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Compress `frame` as a baseline JPEG at `quality` (1..=100).
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    frame.image().write_with_encoder(encoder)?;
    Ok(out)
}

/// Wrap one encoded image in its self-delimited multipart chunk.
pub fn multipart_chunk(jpeg: &[u8]) -> Vec<u8> {
    let head = format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut chunk = Vec::with_capacity(head.len() + jpeg.len() + 2);
    chunk.extend_from_slice(head.as_bytes());
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n");
    chunk
}

/// A [`FrameEncoder`] that streams multipart JPEG chunks into a writer.
///
/// Each frame is flushed as soon as it is written so nothing accumulates between the
/// pipeline and the viewer.
pub struct MultipartEncoder<W: Write> {
    w: W,
    quality: u8,
    frames: u64,
    closed: bool,
}

impl<W: Write> MultipartEncoder<W> {
    pub fn new(w: W, quality: u8) -> Self {
        Self {
            w,
            quality,
            frames: 0,
            closed: false,
        }
    }

    /// Chunks written so far.
    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    pub fn into_inner(self) -> W {
        self.w
    }
}

impl<W: Write> FrameEncoder for MultipartEncoder<W> {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.closed {
            return Err(crate::Error::msg(
                "cannot write frame: encoder is already closed",
            ));
        }

        let jpeg = encode_jpeg(frame, self.quality)?;
        self.w.write_all(&multipart_chunk(&jpeg))?;
        self.w.flush()?;

        self.frames += 1;
        Ok(())
    }

    /// Flush and stop accepting frames. Safe to call more than once.
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.w.flush()?;
        self.closed = true;
        Ok(())
    }
}
