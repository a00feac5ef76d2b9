//! Long-video assembly pipeline.
//!
//! Chains image-to-video renders segment by segment, feeding each
//! segment's last frame forward as the next source image, and stitches
//! the results into a single video. Session bookkeeping and the
//! content-plan boundary sit on top of the orchestrator.

pub mod artifacts;
pub mod config;
pub mod error;
pub mod media;
pub mod orchestrator;
pub mod plan;
pub mod session;
pub mod sink;

pub use config::OrchestratorConfig;
pub use error::{FailureKind, PipelineError};
pub use orchestrator::{LongVideoOrchestrator, LongVideoResult, ProgressEvent, RunState, SegmentRun};
