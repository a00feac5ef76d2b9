use std::path::PathBuf;
use std::time::Duration;

use framechain_comfyui::poll::DEFAULT_RENDER_TIMEOUT;
use framechain_core::segment::FrameLimits;
use framechain_core::stitch::DEFAULT_OUTPUT_FPS;

/// Runtime settings for [`crate::LongVideoOrchestrator`].
///
/// Library code never reads the environment; the worker binary builds
/// this from its own configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Where per-segment videos and the stitched result are written.
    pub scratch_dir: PathBuf,
    /// The render server's output root.
    pub server_output_dir: PathBuf,
    /// Deadline for each segment's render.
    pub render_timeout: Duration,
    /// Frame rate of the stitched output.
    pub output_fps: f64,
    pub limits: FrameLimits,
    /// Delete the server's copy of each output once it has been moved to
    /// scratch storage, so a later lookup cannot pick up a stale file.
    ///
    /// With a render client that cannot name a job's output files, the
    /// lookup falls back to the newest file in a directory shared by every
    /// job. Interleaved requests can then claim and delete each other's
    /// renders; disable this when such a client serves concurrent runs.
    pub remove_server_outputs: bool,
}

impl OrchestratorConfig {
    pub fn new(scratch_dir: impl Into<PathBuf>, server_output_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            server_output_dir: server_output_dir.into(),
            render_timeout: DEFAULT_RENDER_TIMEOUT,
            output_fps: DEFAULT_OUTPUT_FPS,
            limits: FrameLimits::default(),
            remove_server_outputs: true,
        }
    }
}
