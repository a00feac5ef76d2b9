//! The render-client seam and its ComfyUI implementation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::api::ComfyUIApi;
use crate::error::RenderError;
use crate::outputs::{
    find_latest_output, history_output_files, resolve_listed_output, DEFAULT_OUTPUT_EXTENSIONS,
};
use crate::poll::{history_contains, wait_for_completion, DEFAULT_POLL_INTERVAL};

/// Submit-and-wait contract against a render server.
#[async_trait]
pub trait RenderClient: Send + Sync {
    /// Queue a fully materialized job and return the server's job id.
    async fn submit(&self, job: &serde_json::Value) -> Result<String, RenderError>;

    /// Wait until `job_id` is reported complete or `timeout` elapses.
    async fn await_completion(&self, job_id: &str, timeout: Duration) -> Result<(), RenderError>;

    /// Newest rendered file under `output_root`, or `None` when nothing
    /// is there.
    async fn locate_latest_output(&self, output_root: &Path) -> Option<PathBuf>;

    /// The file `job_id` rendered under `output_root`. Defaults to the
    /// newest file, which races with other jobs sharing the directory.
    async fn locate_job_output(&self, _job_id: &str, output_root: &Path) -> Option<PathBuf> {
        self.locate_latest_output(output_root).await
    }

    /// Cheap liveness probe.
    async fn health_check(&self) -> Result<(), RenderError>;

    /// Best-effort removal of a job the caller has given up on.
    async fn cancel(&self, _job_id: &str) {}
}

/// [`RenderClient`] backed by the ComfyUI HTTP API.
pub struct ComfyUIRenderer {
    api: ComfyUIApi,
    client_id: String,
    poll_interval: Duration,
    output_extensions: Vec<String>,
}

impl ComfyUIRenderer {
    pub fn new(api: ComfyUIApi, client_id: impl Into<String>) -> Self {
        Self {
            api,
            client_id: client_id.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            output_extensions: DEFAULT_OUTPUT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Replace the file extensions treated as render output (without dot).
    pub fn with_output_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn api(&self) -> &ComfyUIApi {
        &self.api
    }
}

#[async_trait]
impl RenderClient for ComfyUIRenderer {
    async fn submit(&self, job: &serde_json::Value) -> Result<String, RenderError> {
        let response = self.api.submit_workflow(job, &self.client_id).await?;
        if response.prompt_id.is_empty() {
            return Err(RenderError::InvalidResponse(
                "submission returned an empty prompt_id".to_string(),
            ));
        }
        tracing::info!(
            job_id = %response.prompt_id,
            queue_position = response.number,
            "Submitted workflow",
        );
        Ok(response.prompt_id)
    }

    async fn await_completion(&self, job_id: &str, timeout: Duration) -> Result<(), RenderError> {
        tracing::info!(job_id, timeout_secs = timeout.as_secs(), "Waiting for render");
        let api = &self.api;
        wait_for_completion(job_id, timeout, self.poll_interval, move || async move {
            api.get_history(job_id)
                .await
                .map(|history| history_contains(&history, job_id))
        })
        .await
    }

    async fn locate_latest_output(&self, output_root: &Path) -> Option<PathBuf> {
        let today = chrono::Local::now().date_naive();
        match find_latest_output(output_root, &self.output_extensions, today).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(
                    output_root = %output_root.display(),
                    error = %e,
                    "Failed to scan render output directory",
                );
                None
            }
        }
    }

    async fn locate_job_output(&self, job_id: &str, output_root: &Path) -> Option<PathBuf> {
        match self.api.get_history(job_id).await {
            Ok(history) => {
                let listed = history_output_files(&history, job_id);
                if let Some(path) =
                    resolve_listed_output(output_root, &listed, &self.output_extensions).await
                {
                    return Some(path);
                }
                tracing::debug!(job_id, listed = listed.len(), "No listed output on disk, using newest file");
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "History lookup failed, using newest file");
            }
        }
        self.locate_latest_output(output_root).await
    }

    async fn health_check(&self) -> Result<(), RenderError> {
        match self.api.system_stats().await {
            Ok(_) => Ok(()),
            Err(crate::api::ComfyUIApiError::Status { status, body }) => Err(
                RenderError::InvalidResponse(format!("health check returned {status}: {body}")),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn cancel(&self, job_id: &str) {
        match self.api.cancel_execution(job_id).await {
            Ok(()) => tracing::info!(job_id, "Removed job from queue"),
            Err(e) => tracing::warn!(job_id, error = %e, "Failed to remove job from queue"),
        }
    }
}
