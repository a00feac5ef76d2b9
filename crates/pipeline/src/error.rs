//! Pipeline error taxonomy.
//!
//! Every variant maps to a [`FailureKind`] so callers can tell a request
//! that never started from one that never finished or finished unusable,
//! and decide whether resubmitting is worth it.

use std::path::PathBuf;
use std::time::Duration;

use framechain_comfyui::RenderError;
use framechain_core::error::CoreError;
use framechain_core::media::MediaError;
use framechain_core::workflow_template::TemplateError;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The request breaks a shape or frame-budget rule. Raised before any
    /// render call.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The job template is missing or corrupt.
    #[error("Workflow template error: {0}")]
    Template(#[from] TemplateError),

    /// The render server refused a segment's job.
    #[error("Segment {segment}: render server rejected the job ({status}): {body}")]
    Submission {
        segment: usize,
        status: u16,
        body: String,
    },

    /// The render server could not be reached while submitting.
    #[error("Segment {segment}: render server unreachable: {message}")]
    Unreachable { segment: usize, message: String },

    /// The job was accepted but never reported complete.
    #[error("Segment {segment}: job {job_id} did not complete within {}s", .timeout.as_secs())]
    Timeout {
        segment: usize,
        job_id: String,
        timeout: Duration,
    },

    /// The job completed but no output file could be found.
    #[error("Segment {segment}: job {job_id} completed but no output was found under {}", .output_root.display())]
    MissingOutput {
        segment: usize,
        job_id: String,
        output_root: PathBuf,
    },

    /// A video had no decodable frames.
    #[error("No decodable frame in {}", .0.display())]
    NoFrame(PathBuf),

    /// The caller's source image or video does not exist. Raised before
    /// any render call.
    #[error("Source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// An intermediate file needed after rendering does not exist.
    #[error("Input file not found: {}", .0.display())]
    Input(PathBuf),

    /// Filesystem failure while moving or writing an artifact.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Decode, encode or image failure not covered above.
    #[error("Media processing failed: {0}")]
    Media(MediaError),

    /// The caller cancelled the request between segments.
    #[error("Cancelled after {completed} completed segment(s)")]
    Cancelled { completed: usize },

    /// The session already has a request in flight.
    #[error("Session {0} already has a request in progress")]
    SessionBusy(String),
}

/// Coarse outcome class of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Rejected before rendering anything useful (validation, submission).
    NeverStarted,
    /// A render was accepted but never reported completion.
    NeverFinished,
    /// A render finished but its output could not be used.
    FinishedUnusable,
    /// Stopped on request.
    Aborted,
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Validation(_)
            | Self::Template(_)
            | Self::SourceNotFound(_)
            | Self::Submission { .. }
            | Self::Unreachable { .. }
            | Self::SessionBusy(_) => FailureKind::NeverStarted,
            Self::Timeout { .. } => FailureKind::NeverFinished,
            Self::MissingOutput { .. }
            | Self::NoFrame(_)
            | Self::Input(_)
            | Self::Io(_)
            | Self::Media(_) => FailureKind::FinishedUnusable,
            Self::Cancelled { .. } => FailureKind::Aborted,
        }
    }

    /// Attach the failing segment index to a render-client error.
    pub fn from_render(segment: usize, err: RenderError) -> Self {
        match err {
            RenderError::Submission { status, body } => Self::Submission {
                segment,
                status,
                body,
            },
            RenderError::Transport(e) => Self::Unreachable {
                segment,
                message: e.to_string(),
            },
            RenderError::InvalidResponse(message) => Self::Unreachable { segment, message },
            RenderError::Timeout { job_id, timeout } => Self::Timeout {
                segment,
                job_id,
                timeout,
            },
        }
    }
}

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => Self::Validation(msg),
        }
    }
}

impl From<MediaError> for PipelineError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::VideoNotFound(path) => Self::Input(path),
            MediaError::NoFrame(path) => Self::NoFrame(path),
            MediaError::Io(e) => Self::Io(e),
            other => Self::Media(other),
        }
    }
}
