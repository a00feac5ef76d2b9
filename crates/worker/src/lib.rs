//! Wiring for the long-video worker binary.

pub mod config;

use std::path::Path;
use std::sync::Arc;

use framechain_comfyui::api::ComfyUIApi;
use framechain_comfyui::{ComfyUIRenderer, RenderClient};
use framechain_core::segment::{LongVideoRequest, SourceMedia};
use framechain_core::workflow_template::WorkflowTemplate;
use framechain_pipeline::media::MediaToolkit;
use framechain_pipeline::plan::parse_content_plan;
use framechain_pipeline::sink::InputDirSink;
use framechain_pipeline::{LongVideoOrchestrator, PipelineError, ProgressEvent};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;

use crate::config::WorkerConfig;

/// Render client configured from `config`.
pub fn build_renderer(config: &WorkerConfig) -> ComfyUIRenderer {
    ComfyUIRenderer::new(ComfyUIApi::new(config.comfyui_url.clone()), config.client_id.clone())
        .with_poll_interval(config.poll_interval)
}

/// Assemble an orchestrator backed by ComfyUI and ffmpeg.
pub async fn build_orchestrator(
    config: &WorkerConfig,
    renderer: Arc<dyn RenderClient>,
) -> Result<LongVideoOrchestrator, PipelineError> {
    let template = WorkflowTemplate::load(&config.workflow_file).await?;

    Ok(LongVideoOrchestrator::new(
        renderer,
        Arc::new(MediaToolkit::ffmpeg()),
        Arc::new(template),
        Arc::new(InputDirSink::new(&config.comfyui_input_dir)),
        config.orchestrator_config(),
    ))
}

/// Spawn a task that logs every progress event it receives.
///
/// The task ends once every sender is dropped and yields the number of
/// events it logged.
pub fn spawn_progress_logger() -> (UnboundedSender<ProgressEvent>, JoinHandle<usize>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let handle = tokio::spawn(async move {
        let mut seen = 0;
        while let Some(event) = rx.recv().await {
            seen += 1;
            tracing::debug!(
                request_id = %event.request_id,
                state = %event.state,
                total_segments = event.total_segments,
                "Progress",
            );
        }
        seen
    });
    (tx, handle)
}

/// Errors reading a request description from disk.
#[derive(Debug, thiserror::Error)]
pub enum RequestFileError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid request JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid content plan: {0}")]
    Plan(#[from] framechain_pipeline::plan::PlanError),
}

async fn read_text(path: &Path) -> Result<String, RequestFileError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| RequestFileError::Io {
            path: path.display().to_string(),
            source,
        })
}

/// Load a JSON-encoded [`LongVideoRequest`].
pub async fn load_request(path: &Path) -> Result<LongVideoRequest, RequestFileError> {
    let text = read_text(path).await?;
    Ok(serde_json::from_str(&text)?)
}

/// Build a request from a planner's raw answer saved to `path`.
pub async fn load_plan_request(
    path: &Path,
    source: SourceMedia,
) -> Result<LongVideoRequest, RequestFileError> {
    let text = read_text(path).await?;
    let plan = parse_content_plan(&text)?;
    tracing::info!(title = %plan.title, segments = plan.segments.len(), "Loaded content plan");
    Ok(plan.into_request(source))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use framechain_pipeline::RunState;

    use super::*;

    #[tokio::test]
    async fn progress_logger_drains_until_senders_drop() {
        let (tx, handle) = spawn_progress_logger();
        for state in [RunState::Init, RunState::Rendering(0), RunState::Done] {
            tx.send(ProgressEvent {
                request_id: "req-1".into(),
                state,
                total_segments: 1,
            })
            .unwrap();
        }
        drop(tx);

        assert_eq!(handle.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn request_file_round_trips_through_serde() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request.json");
        std::fs::write(
            &path,
            r#"{
                "initial_prompt": "a castle at dawn",
                "source": {"kind": "image", "path": "/in/castle.png"},
                "segments": [
                    {"prompt": "a castle at dawn", "frames": 60},
                    {"frame_count": 40}
                ]
            }"#,
        )
        .unwrap();

        let request = load_request(&path).await.unwrap();
        assert_eq!(request.segments.len(), 2);
        assert_eq!(request.segments[1].prompt, None);
        assert_eq!(request.total_frames(), 100);
        assert_eq!(request.source, SourceMedia::Image("/in/castle.png".into()));
    }

    #[tokio::test]
    async fn missing_request_file_is_io_error() {
        let result = load_request(Path::new("/no/such/request.json")).await;
        assert_matches!(result, Err(RequestFileError::Io { .. }));
    }

    #[tokio::test]
    async fn plan_file_becomes_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.txt");
        std::fs::write(
            &path,
            r#"Here you go: {"title": "t", "prompt": "fog", "segments": [{"frames": 30}]}"#,
        )
        .unwrap();

        let request = load_plan_request(&path, SourceMedia::Video("/clips/a.mp4".into()))
            .await
            .unwrap();
        assert_eq!(request.initial_prompt, "fog");
        assert_eq!(request.segments[0].frame_count, 30);
    }
}
