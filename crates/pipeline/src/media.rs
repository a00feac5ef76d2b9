//! The orchestrator's view of frame extraction and stitching.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use framechain_core::ffmpeg::{FfmpegDecoder, FfmpegEncoder};
use framechain_core::frames;
use framechain_core::media::{MediaError, VideoDecoder, VideoEncoder};
use framechain_core::resolution::TargetSize;
use framechain_core::stitch::{self, StitchSummary};

#[async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Pixel dimensions of a still image.
    async fn image_dimensions(&self, image: &Path) -> Result<(u32, u32), MediaError>;

    /// Write the last frame of `video` to `output` as-is.
    async fn extract_last_frame(&self, video: &Path, output: &Path) -> Result<PathBuf, MediaError>;

    /// Write the last frame of `video` to `output`, cropped and resized
    /// to the render size matching its orientation.
    async fn extract_fitted_last_frame(
        &self,
        video: &Path,
        output: &Path,
    ) -> Result<(PathBuf, TargetSize), MediaError>;

    /// Concatenate `inputs` in order into `output`.
    async fn concatenate(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        fps: f64,
    ) -> Result<StitchSummary, MediaError>;
}

/// [`MediaProcessor`] over any decoder/encoder pair.
pub struct MediaToolkit<D, E> {
    decoder: D,
    encoder: E,
}

impl<D: VideoDecoder, E: VideoEncoder> MediaToolkit<D, E> {
    pub fn new(decoder: D, encoder: E) -> Self {
        Self { decoder, encoder }
    }
}

impl MediaToolkit<FfmpegDecoder, FfmpegEncoder> {
    /// Toolkit backed by the `ffmpeg`/`ffprobe` binaries on `PATH`.
    pub fn ffmpeg() -> Self {
        Self::new(FfmpegDecoder::new(), FfmpegEncoder::default())
    }
}

#[async_trait]
impl<D: VideoDecoder, E: VideoEncoder> MediaProcessor for MediaToolkit<D, E> {
    async fn image_dimensions(&self, image: &Path) -> Result<(u32, u32), MediaError> {
        if !tokio::fs::try_exists(image).await.unwrap_or(false) {
            return Err(MediaError::VideoNotFound(image.to_path_buf()));
        }
        frames::image_dimensions(image).await
    }

    async fn extract_last_frame(&self, video: &Path, output: &Path) -> Result<PathBuf, MediaError> {
        frames::extract_last_frame(&self.decoder, video, output).await
    }

    async fn extract_fitted_last_frame(
        &self,
        video: &Path,
        output: &Path,
    ) -> Result<(PathBuf, TargetSize), MediaError> {
        frames::extract_last_frame_fitted(&self.decoder, video, output).await
    }

    async fn concatenate(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        fps: f64,
    ) -> Result<StitchSummary, MediaError> {
        stitch::concatenate(&self.decoder, &self.encoder, inputs, output, fps).await
    }
}
