//! Where source images go so the render server can read them.
//!
//! The server loads a job's source image by bare filename from its own
//! input directory. Anything that produces a source image (staging the
//! caller's image, bridging from a rendered segment) asks the sink for
//! the destination path and for the name to put in the job.

use std::path::{Component, Path, PathBuf};

pub trait SourceImageSink: Send + Sync {
    /// Absolute path at which a source image called `file_name` must be
    /// written.
    fn destination(&self, file_name: &str) -> PathBuf;

    /// The name the render server knows `path` by, or `None` when the
    /// server cannot see it.
    fn reference(&self, path: &Path) -> Option<String>;
}

/// Sink backed by the render server's input directory.
#[derive(Debug, Clone)]
pub struct InputDirSink {
    dir: PathBuf,
}

impl InputDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SourceImageSink for InputDirSink {
    fn destination(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    fn reference(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.dir).ok()?;
        let mut components = relative.components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => name.to_str().map(str::to_string),
            _ => None,
        }
    }
}
