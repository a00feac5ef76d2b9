//! Concatenation of rendered segment videos into one output.
//!
//! Output dimensions come from the first input; frames of any other size
//! are resized (not cropped) to match. The output frame rate is chosen by
//! the caller and applied uniformly, and audio is not carried over.

use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use serde::Serialize;

use crate::media::{MediaError, VideoDecoder, VideoEncoder};

/// Frame rate used for stitched output unless configured otherwise.
pub const DEFAULT_OUTPUT_FPS: f64 = 20.0;

/// Fewest inputs [`concatenate`] accepts.
pub const MIN_STITCH_INPUTS: usize = 2;

/// What [`concatenate`] produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StitchSummary {
    pub frames_written: u64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Concatenate `inputs` in order into `output` at `fps`.
///
/// Every input is probed before the output is created, so a missing
/// input fails without leaving a partial file behind. A failure after
/// the output was created removes it best-effort.
pub async fn concatenate(
    decoder: &dyn VideoDecoder,
    encoder: &dyn VideoEncoder,
    inputs: &[PathBuf],
    output: &Path,
    fps: f64,
) -> Result<StitchSummary, MediaError> {
    if inputs.len() < MIN_STITCH_INPUTS {
        return Err(MediaError::InvalidInput(format!(
            "need at least {MIN_STITCH_INPUTS} videos to concatenate, got {}",
            inputs.len()
        )));
    }
    if !(fps.is_finite() && fps > 0.0) {
        return Err(MediaError::InvalidInput(format!(
            "output frame rate must be positive, got {fps}"
        )));
    }

    let mut first = None;
    for input in inputs {
        let info = decoder.probe(input).await?;
        first.get_or_insert(info);
    }
    let Some(first) = first else {
        return Err(MediaError::InvalidInput("no inputs".to_string()));
    };
    if first.width == 0 || first.height == 0 {
        return Err(MediaError::InvalidInput(format!(
            "first video {} reports no frame size",
            inputs[0].display()
        )));
    }

    tracing::info!(
        inputs = inputs.len(),
        width = first.width,
        height = first.height,
        fps,
        output = %output.display(),
        "Concatenating videos",
    );

    match write_all(decoder, encoder, inputs, output, first.width, first.height, fps).await {
        Ok(frames_written) => Ok(StitchSummary {
            frames_written,
            width: first.width,
            height: first.height,
            fps,
        }),
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(output).await {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(output = %output.display(), error = %rm, "Failed to remove partial output");
                }
            }
            Err(e)
        }
    }
}

async fn write_all(
    decoder: &dyn VideoDecoder,
    encoder: &dyn VideoEncoder,
    inputs: &[PathBuf],
    output: &Path,
    width: u32,
    height: u32,
    fps: f64,
) -> Result<u64, MediaError> {
    let mut writer = encoder.create(output, width, height, fps).await?;
    let mut frames_written = 0u64;

    for input in inputs {
        let mut reader = decoder.frames(input).await?;
        let mut from_input = 0u64;
        while let Some(frame) = reader.next_frame().await? {
            if frame.dimensions() == (width, height) {
                writer.write_frame(&frame).await?;
            } else {
                let resized = imageops::resize(&frame, width, height, FilterType::Triangle);
                writer.write_frame(&resized).await?;
            }
            from_input += 1;
        }
        tracing::debug!(input = %input.display(), frames = from_input, "Appended video");
        frames_written += from_input;
    }

    writer.finish().await?;
    Ok(frames_written)
}
