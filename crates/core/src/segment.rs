//! Segment and long-video request types, plus frame-budget validation.
//!
//! A long video is an ordered list of [`Segment`]s rendered one after
//! another, each seeded with the last frame of its predecessor.
//! [`validate_request`] enforces the per-segment and total frame
//! ceilings before anything is submitted to the render server.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/* --------------------------------------------------------------------------
Limits
-------------------------------------------------------------------------- */

/// Fewest frames a single segment may request.
pub const MIN_SEGMENT_FRAMES: u32 = 2;

/// Most frames a single segment may request.
pub const MAX_SEGMENT_FRAMES: u32 = 125;

/// Ceiling on the summed frame count of one request.
pub const MAX_TOTAL_FRAMES: u32 = 10_000;

/// Frame ceilings applied to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameLimits {
    pub min_segment_frames: u32,
    pub max_segment_frames: u32,
    pub max_total_frames: u32,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            min_segment_frames: MIN_SEGMENT_FRAMES,
            max_segment_frames: MAX_SEGMENT_FRAMES,
            max_total_frames: MAX_TOTAL_FRAMES,
        }
    }
}

/* --------------------------------------------------------------------------
Data structures
-------------------------------------------------------------------------- */

/// One prompt + frame-count unit of a long video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Prompt for this segment. `None` (or blank) inherits the previous
    /// segment's resolved prompt.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Number of frames to render.
    #[serde(alias = "frames")]
    pub frame_count: u32,
}

impl Segment {
    pub fn new(prompt: impl Into<String>, frame_count: u32) -> Self {
        Self {
            prompt: Some(prompt.into()),
            frame_count,
        }
    }

    /// A segment that reuses the previous segment's prompt.
    pub fn inheriting(frame_count: u32) -> Self {
        Self {
            prompt: None,
            frame_count,
        }
    }

    /// The explicit prompt, if one was given and is not blank.
    pub fn explicit_prompt(&self) -> Option<&str> {
        self.prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// Where the first segment's source image comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum SourceMedia {
    /// A still image used directly as segment 0's source.
    Image(PathBuf),
    /// An existing video being extended: its last frame seeds segment 0
    /// and the video itself is prepended to the stitched output.
    Video(PathBuf),
}

impl SourceMedia {
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Image(p) | Self::Video(p) => p,
        }
    }
}

/// A complete long-video request as handed to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongVideoRequest {
    /// Prompt used by the first segment when it has none of its own.
    pub initial_prompt: String,
    pub source: SourceMedia,
    /// Ordered segments; rendered and stitched in this order.
    pub segments: Vec<Segment>,
}

impl LongVideoRequest {
    /// Sum of all segment frame counts.
    pub fn total_frames(&self) -> u64 {
        self.segments.iter().map(|s| s.frame_count as u64).sum()
    }
}

/* --------------------------------------------------------------------------
Validation functions
-------------------------------------------------------------------------- */

/// Validate a single segment's frame count against the limits.
pub fn validate_frame_count(frame_count: u32, limits: &FrameLimits) -> Result<(), CoreError> {
    if frame_count < limits.min_segment_frames || frame_count > limits.max_segment_frames {
        return Err(CoreError::Validation(format!(
            "Frame count must be between {} and {} (got {frame_count})",
            limits.min_segment_frames, limits.max_segment_frames
        )));
    }
    Ok(())
}

/// Validate a request's shape and frame budget.
///
/// Checks, in order: at least one segment, every segment inside the
/// per-segment range, the total within the ceiling, and a usable prompt
/// for the first segment.
pub fn validate_request(request: &LongVideoRequest, limits: &FrameLimits) -> Result<(), CoreError> {
    if request.segments.is_empty() {
        return Err(CoreError::Validation(
            "Request must contain at least one segment".to_string(),
        ));
    }

    for (index, segment) in request.segments.iter().enumerate() {
        validate_frame_count(segment.frame_count, limits).map_err(|CoreError::Validation(msg)| {
            CoreError::Validation(format!("Segment {index}: {msg}"))
        })?;
    }

    let total = request.total_frames();
    if total > limits.max_total_frames as u64 {
        return Err(CoreError::Validation(format!(
            "Total frame count {total} exceeds the limit of {}",
            limits.max_total_frames
        )));
    }

    let first_has_prompt = request.segments[0].explicit_prompt().is_some();
    if !first_has_prompt && request.initial_prompt.trim().is_empty() {
        return Err(CoreError::Validation(
            "First segment has no prompt and no initial prompt was given".to_string(),
        ));
    }

    Ok(())
}
