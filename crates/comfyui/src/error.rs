use std::time::Duration;

use crate::api::ComfyUIApiError;

/// Failures surfaced by a [`crate::RenderClient`].
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The server answered the submission with a non-success status.
    #[error("render server rejected the job ({status}): {body}")]
    Submission { status: u16, body: String },

    /// The server could not be reached or its reply could not be read.
    #[error("render server unreachable: {0}")]
    Transport(#[source] reqwest::Error),

    /// The job never showed up in the server's history before the deadline.
    #[error("job {job_id} did not complete within {}s", .timeout.as_secs())]
    Timeout { job_id: String, timeout: Duration },

    /// The server replied with a body that does not follow its contract.
    #[error("unexpected render server response: {0}")]
    InvalidResponse(String),
}

impl From<ComfyUIApiError> for RenderError {
    fn from(err: ComfyUIApiError) -> Self {
        match err {
            ComfyUIApiError::Status { status, body } => Self::Submission { status, body },
            ComfyUIApiError::Request(e) if e.is_decode() => Self::InvalidResponse(e.to_string()),
            ComfyUIApiError::Request(e) => Self::Transport(e),
        }
    }
}
