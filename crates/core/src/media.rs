//! Decoder/encoder seams for the frame extractor and the stitcher.
//!
//! Frames are plain RGB buffers. The ffmpeg-backed implementations live
//! in [`crate::ffmpeg`]; tests substitute in-memory fakes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// A decoded video frame.
pub type Frame = image::RgbImage;

/// Error type for decoding, encoding and frame I/O.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("input file not found: {}", .0.display())]
    VideoNotFound(PathBuf),

    #[error("invalid media input: {0}")]
    InvalidInput(String),

    #[error("no decodable frame in {}", .0.display())]
    NoFrame(PathBuf),

    #[error("ffprobe/ffmpeg binary not found: {0}")]
    BinaryNotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("image encode/decode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stream properties reported by a decoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Container-reported frame count. Not trustworthy for every
    /// container, and `None` when unknown.
    pub frame_count: Option<u64>,
}

/// Sequential access to the frames of one video.
#[async_trait]
pub trait FrameReader: Send {
    /// The next frame in presentation order, or `None` at end of stream.
    async fn next_frame(&mut self) -> Result<Option<Frame>, MediaError>;
}

/// Reads video files.
#[async_trait]
pub trait VideoDecoder: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<VideoInfo, MediaError>;

    /// Seek directly to frame `index` (0-based). `Ok(None)` means the
    /// seek landed nowhere decodable.
    async fn frame_at(&self, path: &Path, index: u64) -> Result<Option<Frame>, MediaError>;

    /// Open the video for sequential decoding from the first frame.
    async fn frames(&self, path: &Path) -> Result<Box<dyn FrameReader>, MediaError>;
}

/// Receives frames for one output video.
#[async_trait]
pub trait FrameWriter: Send {
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), MediaError>;

    /// Flush and close the output. Must be called for the file to be valid.
    async fn finish(self: Box<Self>) -> Result<(), MediaError>;
}

/// Creates video files.
#[async_trait]
pub trait VideoEncoder: Send + Sync {
    async fn create(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Box<dyn FrameWriter>, MediaError>;
}
