//! Long-video orchestrator.
//!
//! Drives one request through `INIT -> RENDERING(i) -> EXTRACTING(i) ->
//! ... -> STITCHING -> DONE`, with `FAILED` reachable from any state.
//! `CLEANUP` always runs before the outcome is reported.
//!
//! Segments are strictly sequential: segment `i + 1` renders from the
//! last frame of segment `i`. Cancellation is honoured at segment
//! boundaries only, since a render in progress cannot be preempted.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use framechain_comfyui::{RenderClient, RenderError};
use framechain_core::resolution::{select_target_size, TargetSize};
use framechain_core::segment::{validate_request, LongVideoRequest, Segment, SourceMedia};
use framechain_core::stitch::StitchSummary;
use framechain_core::types::JobId;
use framechain_core::workflow_template::{MaterializeParams, WorkflowTemplate};

use crate::artifacts::{ArtifactGuard, ArtifactNamer};
use crate::config::OrchestratorConfig;
use crate::error::PipelineError;
use crate::media::MediaProcessor;
use crate::session::SessionStore;
use crate::sink::SourceImageSink;

// ---------------------------------------------------------------------------
// Run state and reporting
// ---------------------------------------------------------------------------

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "segment", rename_all = "snake_case")]
pub enum RunState {
    Init,
    Rendering(usize),
    Extracting(usize),
    Stitching,
    Cleanup,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("INIT"),
            Self::Rendering(i) => write!(f, "RENDERING({i})"),
            Self::Extracting(i) => write!(f, "EXTRACTING({i})"),
            Self::Stitching => f.write_str("STITCHING"),
            Self::Cleanup => f.write_str("CLEANUP"),
            Self::Done => f.write_str("DONE"),
            Self::Failed => f.write_str("FAILED"),
        }
    }
}

/// A state transition, as sent to a progress listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub request_id: String,
    pub state: RunState,
    pub total_segments: usize,
}

/// One rendered segment.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentRun {
    pub index: usize,
    pub segment: Segment,
    /// The prompt actually rendered, after inheritance.
    pub prompt: String,
    pub source_image: PathBuf,
    pub size: TargetSize,
    pub job_id: JobId,
    pub result_video_path: PathBuf,
}

/// Successful outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct LongVideoResult {
    /// The finished video. Owned by the caller from here on.
    pub video: PathBuf,
    pub runs: Vec<SegmentRun>,
    /// Present when more than one video was stitched.
    pub stitched: Option<StitchSummary>,
}

struct Progress {
    request_id: String,
    total_segments: usize,
    listener: Option<UnboundedSender<ProgressEvent>>,
}

impl Progress {
    fn enter(&self, state: RunState) {
        tracing::info!(
            request_id = %self.request_id,
            state = %state,
            total_segments = self.total_segments,
            "Long video state",
        );
        if let Some(tx) = &self.listener {
            // A listener that went away is not the run's problem.
            let _ = tx.send(ProgressEvent {
                request_id: self.request_id.clone(),
                state,
                total_segments: self.total_segments,
            });
        }
    }
}

/// Mutable state of one run.
struct RunContext {
    namer: ArtifactNamer,
    guard: ArtifactGuard,
    progress: Progress,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Renders a [`LongVideoRequest`] into a single video.
pub struct LongVideoOrchestrator {
    renderer: Arc<dyn RenderClient>,
    media: Arc<dyn MediaProcessor>,
    template: Arc<WorkflowTemplate>,
    sink: Arc<dyn SourceImageSink>,
    config: OrchestratorConfig,
}

impl LongVideoOrchestrator {
    pub fn new(
        renderer: Arc<dyn RenderClient>,
        media: Arc<dyn MediaProcessor>,
        template: Arc<WorkflowTemplate>,
        sink: Arc<dyn SourceImageSink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            renderer,
            media,
            template,
            sink,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run `request` to completion, failure or cancellation.
    pub async fn run(
        &self,
        request: LongVideoRequest,
        cancel: CancellationToken,
    ) -> Result<LongVideoResult, PipelineError> {
        self.execute(request, cancel, None).await
    }

    /// Like [`Self::run`], reporting every state transition to `progress`.
    pub async fn run_with_progress(
        &self,
        request: LongVideoRequest,
        cancel: CancellationToken,
        progress: UnboundedSender<ProgressEvent>,
    ) -> Result<LongVideoResult, PipelineError> {
        self.execute(request, cancel, Some(progress)).await
    }

    /// Run `request` as the single in-flight request of `session_id`.
    ///
    /// Fails with [`PipelineError::SessionBusy`] if the session already
    /// has one. [`SessionStore::cancel`] stops the run at the next
    /// segment boundary.
    pub async fn run_in_session(
        &self,
        sessions: &SessionStore,
        session_id: &str,
        request: LongVideoRequest,
    ) -> Result<LongVideoResult, PipelineError> {
        let in_flight = sessions.begin(session_id)?;
        self.run(request, in_flight.token()).await
    }

    async fn execute(
        &self,
        request: LongVideoRequest,
        cancel: CancellationToken,
        listener: Option<UnboundedSender<ProgressEvent>>,
    ) -> Result<LongVideoResult, PipelineError> {
        let request_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let progress = Progress {
            request_id: request_id.clone(),
            total_segments: request.segments.len(),
            listener,
        };
        progress.enter(RunState::Init);

        if let Err(e) = validate_request(&request, &self.config.limits) {
            tracing::warn!(request_id = %request_id, error = %e, "Rejected long video request");
            progress.enter(RunState::Failed);
            return Err(e.into());
        }

        let mut ctx = RunContext {
            namer: ArtifactNamer::new(&request_id),
            guard: ArtifactGuard::new(),
            progress,
        };

        let outcome = self.drive(&request, &cancel, &mut ctx).await;

        ctx.progress.enter(RunState::Cleanup);
        let keep = outcome.as_ref().ok().map(|r| r.video.clone());
        let report = ctx.guard.cleanup(keep.as_deref()).await;
        tracing::debug!(
            request_id = %request_id,
            removed = report.removed,
            failed = report.failed,
            "Artifacts cleaned up",
        );

        match &outcome {
            Ok(result) => {
                ctx.progress.enter(RunState::Done);
                tracing::info!(
                    request_id = %request_id,
                    video = %result.video.display(),
                    segments = result.runs.len(),
                    "Long video complete",
                );
            }
            Err(e) => {
                ctx.progress.enter(RunState::Failed);
                tracing::error!(
                    request_id = %request_id,
                    kind = ?e.kind(),
                    error = %e,
                    "Long video failed",
                );
            }
        }
        outcome
    }

    async fn drive(
        &self,
        request: &LongVideoRequest,
        cancel: &CancellationToken,
        ctx: &mut RunContext,
    ) -> Result<LongVideoResult, PipelineError> {
        let (mut source_image, mut videos) = self.prepare_source(&request.source, ctx).await?;

        let mut prompt = request.initial_prompt.trim().to_string();
        let mut runs = Vec::with_capacity(request.segments.len());
        let last = request.segments.len() - 1;

        for (index, segment) in request.segments.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled { completed: index });
            }
            if let Some(explicit) = segment.explicit_prompt() {
                prompt = explicit.to_string();
            }

            ctx.progress.enter(RunState::Rendering(index));
            let run = self
                .render_segment(index, segment, &prompt, &source_image, ctx)
                .await?;
            videos.push(run.result_video_path.clone());

            if index < last {
                ctx.progress.enter(RunState::Extracting(index));
                let bridge = self.sink.destination(&ctx.namer.bridge_frame(index));
                ctx.guard.track(&bridge);
                self.media
                    .extract_last_frame(&run.result_video_path, &bridge)
                    .await?;
                source_image = bridge;
            }
            runs.push(run);
        }

        if videos.len() == 1 {
            let video = videos.remove(0);
            return Ok(LongVideoResult {
                video,
                runs,
                stitched: None,
            });
        }

        ctx.progress.enter(RunState::Stitching);
        let output = self.config.scratch_dir.join(ctx.namer.final_video());
        ctx.guard.track(&output);
        let summary = self
            .media
            .concatenate(&videos, &output, self.config.output_fps)
            .await?;

        Ok(LongVideoResult {
            video: output,
            runs,
            stitched: Some(summary),
        })
    }

    /// Resolve segment 0's source image, and any video that precedes the
    /// new segments in the stitched output.
    async fn prepare_source(
        &self,
        source: &SourceMedia,
        ctx: &mut RunContext,
    ) -> Result<(PathBuf, Vec<PathBuf>), PipelineError> {
        let path = source.path();
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(PipelineError::SourceNotFound(path.to_path_buf()));
        }
        ctx.guard.protect(path);

        match source {
            SourceMedia::Image(image) => {
                if self.sink.reference(image).is_some() {
                    return Ok((image.clone(), Vec::new()));
                }
                let extension = image
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("png")
                    .to_ascii_lowercase();
                let staged = self.sink.destination(&ctx.namer.source_image(&extension));
                ctx.guard.track(&staged);
                copy_file(image, &staged).await?;
                tracing::debug!(
                    from = %image.display(),
                    to = %staged.display(),
                    "Staged source image",
                );
                Ok((staged, Vec::new()))
            }
            SourceMedia::Video(video) => {
                let bridge = self.sink.destination(&ctx.namer.source_image("png"));
                ctx.guard.track(&bridge);
                let (bridge, size) = self.media.extract_fitted_last_frame(video, &bridge).await?;
                tracing::info!(
                    video = %video.display(),
                    width = size.width,
                    height = size.height,
                    "Extending existing video",
                );
                Ok((bridge, vec![video.clone()]))
            }
        }
    }

    async fn render_segment(
        &self,
        index: usize,
        segment: &Segment,
        prompt: &str,
        source_image: &Path,
        ctx: &mut RunContext,
    ) -> Result<SegmentRun, PipelineError> {
        let (width, height) = self.media.image_dimensions(source_image).await?;
        let size = select_target_size(width, height);
        let image_name = self
            .sink
            .reference(source_image)
            .ok_or_else(|| PipelineError::Input(source_image.to_path_buf()))?;

        let job = self.template.materialize(&MaterializeParams {
            prompt,
            size,
            frame_count: segment.frame_count,
            source_image_name: &image_name,
        });

        let job_id = self
            .renderer
            .submit(&job.workflow)
            .await
            .map_err(|e| PipelineError::from_render(index, e))?;
        tracing::info!(
            segment = index,
            job_id = %job_id,
            frames = segment.frame_count,
            width = size.width,
            height = size.height,
            "Segment submitted",
        );

        if let Err(e) = self
            .renderer
            .await_completion(&job_id, self.config.render_timeout)
            .await
        {
            if matches!(e, RenderError::Timeout { .. }) {
                self.renderer.cancel(&job_id).await;
            }
            return Err(PipelineError::from_render(index, e));
        }

        let output_root = &self.config.server_output_dir;
        let rendered = self
            .renderer
            .locate_job_output(&job_id, output_root)
            .await
            .ok_or_else(|| PipelineError::MissingOutput {
                segment: index,
                job_id: job_id.clone(),
                output_root: output_root.clone(),
            })?;

        let extension = rendered
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4")
            .to_string();
        let local = self
            .config
            .scratch_dir
            .join(ctx.namer.segment_video(index, &extension));
        ctx.guard.track(&local);
        copy_file(&rendered, &local).await?;

        if self.config.remove_server_outputs {
            if let Err(e) = tokio::fs::remove_file(&rendered).await {
                tracing::warn!(
                    path = %rendered.display(),
                    error = %e,
                    "Failed to remove server output",
                );
            }
        }

        tracing::info!(segment = index, video = %local.display(), "Segment rendered");
        Ok(SegmentRun {
            index,
            segment: segment.clone(),
            prompt: prompt.to_string(),
            source_image: source_image.to_path_buf(),
            size,
            job_id,
            result_video_path: local,
        })
    }
}

async fn copy_file(from: &Path, to: &Path) -> Result<(), PipelineError> {
    if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(from, to).await?;
    Ok(())
}
