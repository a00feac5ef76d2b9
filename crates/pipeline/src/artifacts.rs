//! Intermediate artifact naming and cleanup.
//!
//! Every file a run creates is registered with an [`ArtifactGuard`]
//! before it is written. The run calls [`ArtifactGuard::cleanup`] on
//! every exit path; if the run future is dropped first (task aborted,
//! panic), `Drop` removes the same files synchronously.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Prefix of a staged copy of the caller's source image.
pub const SOURCE_IMAGE_PREFIX: &str = "lv_source_";
/// Prefix of a bridge frame extracted from a segment.
pub const BRIDGE_FRAME_PREFIX: &str = "lv_frame_";
/// Prefix of a per-segment video copied into scratch storage.
pub const SEGMENT_VIDEO_PREFIX: &str = "lv_segment_";
/// Prefix of the stitched result.
pub const FINAL_VIDEO_PREFIX: &str = "lv_final_";

/// Builds collision-free artifact file names for one run.
///
/// Names carry the run's start time and a per-run id, so concurrent
/// runs sharing a scratch directory never write the same file.
#[derive(Debug, Clone)]
pub struct ArtifactNamer {
    stem: String,
}

impl ArtifactNamer {
    pub fn new(request_id: &str) -> Self {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        Self {
            stem: format!("{stamp}_{request_id}"),
        }
    }

    pub fn source_image(&self, extension: &str) -> String {
        format!("{SOURCE_IMAGE_PREFIX}{}.{extension}", self.stem)
    }

    pub fn bridge_frame(&self, segment: usize) -> String {
        format!("{BRIDGE_FRAME_PREFIX}{}_{segment:03}.png", self.stem)
    }

    pub fn segment_video(&self, segment: usize, extension: &str) -> String {
        format!("{SEGMENT_VIDEO_PREFIX}{}_{segment:03}.{extension}", self.stem)
    }

    pub fn final_video(&self) -> String {
        format!("{FINAL_VIDEO_PREFIX}{}.mp4", self.stem)
    }
}

/// Outcome of [`ArtifactGuard::cleanup`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    pub failed: usize,
}

/// Tracks files owned by a run and removes them when it ends.
#[derive(Debug, Default)]
pub struct ArtifactGuard {
    tracked: Vec<PathBuf>,
    protected: HashSet<PathBuf>,
    disarmed: bool,
}

impl ArtifactGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file this run is about to create.
    pub fn track(&mut self, path: impl Into<PathBuf>) {
        self.tracked.push(path.into());
    }

    /// Mark a caller-owned file that must survive cleanup even if it was
    /// also tracked.
    pub fn protect(&mut self, path: impl Into<PathBuf>) {
        self.protected.insert(path.into());
    }

    pub fn tracked(&self) -> &[PathBuf] {
        &self.tracked
    }

    /// Remove every tracked file except `keep` and protected paths.
    ///
    /// Failures are logged and counted, never returned. Files that were
    /// never created are ignored.
    pub async fn cleanup(&mut self, keep: Option<&Path>) -> CleanupReport {
        let mut report = CleanupReport::default();
        for path in self.removable(keep) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "Removed artifact");
                    report.removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove artifact");
                    report.failed += 1;
                }
            }
        }
        self.tracked.clear();
        self.disarmed = true;
        report
    }

    fn removable(&self, keep: Option<&Path>) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        self.tracked
            .iter()
            .filter(|p| Some(p.as_path()) != keep && !self.protected.contains(*p))
            .filter(|p| seen.insert((*p).clone()))
            .cloned()
            .collect()
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        if self.disarmed || self.tracked.is_empty() {
            return;
        }
        tracing::warn!(
            artifacts = self.tracked.len(),
            "Run ended without cleanup, removing artifacts synchronously",
        );
        for path in self.removable(None) {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove artifact");
                }
            }
        }
    }
}
