//! Workflow template loading and materialisation.
//!
//! A workflow template is a render-server job description (JSON) that
//! carries known placeholder ("sentinel") values for the prompt text,
//! the frame width and height, the frame count and the source image
//! filename. [`WorkflowTemplate::materialize`] walks the whole tree and
//! returns a new tree with every sentinel replaced by the run's values.
//! The template itself is never mutated, so one loaded template can be
//! shared by concurrent requests.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resolution::TargetSize;

// ---------------------------------------------------------------------------
// Default sentinels (match the shipped image-to-video workflow)
// ---------------------------------------------------------------------------

/// Prompt text baked into the shipped workflow.
pub const DEFAULT_PROMPT_SENTINEL: &str =
    "a video of a beautiful blondie woman doing gymnastics on the floor";

/// Dimension values baked into the shipped workflow. Which of width or
/// height a match stands for is decided by the enclosing key.
pub const DEFAULT_DIMENSION_SENTINELS: &[u64] = &[720, 1280];

/// Frame count baked into the shipped workflow.
pub const DEFAULT_FRAME_COUNT_SENTINEL: u64 = 101;

/// Source image filename baked into the shipped workflow.
pub const DEFAULT_IMAGE_SENTINEL: &str = "combined_opencv_last_frame.png";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from loading a workflow template.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// The template file does not exist.
    #[error("workflow template not found: {0}")]
    NotFound(PathBuf),

    /// The template file could not be read.
    #[error("failed to read workflow template {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The template is not valid JSON.
    #[error("workflow template is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// The template parsed but its root is not a mapping.
    #[error("workflow template root must be a JSON object")]
    NotAnObject,
}

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// The placeholder values a template is searched for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentinels {
    pub prompt: String,
    pub dimensions: Vec<u64>,
    pub frame_count: u64,
    pub source_image: String,
}

impl Default for Sentinels {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT_SENTINEL.to_string(),
            dimensions: DEFAULT_DIMENSION_SENTINELS.to_vec(),
            frame_count: DEFAULT_FRAME_COUNT_SENTINEL,
            source_image: DEFAULT_IMAGE_SENTINEL.to_string(),
        }
    }
}

/// Run-specific values substituted into a template.
#[derive(Debug, Clone, Copy)]
pub struct MaterializeParams<'a> {
    pub prompt: &'a str,
    pub size: TargetSize,
    pub frame_count: u32,
    /// Filename (not path) of the source image as the render server sees it.
    pub source_image_name: &'a str,
}

/// How many replacements of each placeholder kind were made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubstitutionReport {
    pub prompt: usize,
    pub width: usize,
    pub height: usize,
    pub frame_count: usize,
    pub source_image: usize,
}

impl SubstitutionReport {
    /// Placeholder kinds that were never found.
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("prompt", self.prompt),
            ("width", self.width),
            ("height", self.height),
            ("frame_count", self.frame_count),
            ("source_image", self.source_image),
        ]
        .into_iter()
        .filter(|(_, n)| *n == 0)
        .map(|(name, _)| name)
        .collect()
    }

    /// `true` when every placeholder kind was replaced at least once.
    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}

/// A fully materialised job plus its substitution report.
#[derive(Debug, Clone)]
pub struct MaterializedJob {
    pub workflow: Value,
    pub report: SubstitutionReport,
}

/// Which dimension a key names, judged by its suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Width,
    Height,
}

/// A parsed workflow template.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    root: Value,
    sentinels: Sentinels,
}

impl WorkflowTemplate {
    /// Load a template from disk using the default sentinels.
    pub async fn load(path: &Path) -> Result<Self, TemplateError> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TemplateError::NotFound(path.to_path_buf())
            } else {
                TemplateError::Io {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;
        let template = Self::from_json_str(&text)?;
        tracing::info!(path = %path.display(), "Loaded workflow template");
        Ok(template)
    }

    /// Parse a template from JSON text using the default sentinels.
    pub fn from_json_str(text: &str) -> Result<Self, TemplateError> {
        let root: Value = serde_json::from_str(text)?;
        Self::from_value(root)
    }

    /// Wrap an already-parsed JSON tree using the default sentinels.
    pub fn from_value(root: Value) -> Result<Self, TemplateError> {
        if !root.is_object() {
            return Err(TemplateError::NotAnObject);
        }
        Ok(Self {
            root,
            sentinels: Sentinels::default(),
        })
    }

    /// Replace the sentinel set.
    pub fn with_sentinels(mut self, sentinels: Sentinels) -> Self {
        self.sentinels = sentinels;
        self
    }

    pub fn sentinels(&self) -> &Sentinels {
        &self.sentinels
    }

    /// The unmodified template tree.
    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Produce a new job tree with every sentinel replaced.
    ///
    /// Every mapping and sequence is visited. A template that lacks a
    /// placeholder keeps its default there; the report says which kinds
    /// were not found.
    pub fn materialize(&self, params: &MaterializeParams<'_>) -> MaterializedJob {
        let mut report = SubstitutionReport::default();
        let workflow = self.substitute(&self.root, None, params, &mut report);

        let missing = report.missing();
        if !missing.is_empty() {
            tracing::warn!(?missing, "Workflow template left placeholders unmatched");
        }

        MaterializedJob { workflow, report }
    }

    // ---- private helpers ----

    fn substitute(
        &self,
        value: &Value,
        key: Option<&str>,
        params: &MaterializeParams<'_>,
        report: &mut SubstitutionReport,
    ) -> Value {
        if let Some(replacement) = self.replacement_for(value, key, params, report) {
            return replacement;
        }
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.substitute(v, Some(k), params, report)))
                    .collect(),
            ),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.substitute(v, None, params, report))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// The replacement for a scalar, if it is a sentinel.
    fn replacement_for(
        &self,
        value: &Value,
        key: Option<&str>,
        params: &MaterializeParams<'_>,
        report: &mut SubstitutionReport,
    ) -> Option<Value> {
        let s = &self.sentinels;

        if value.as_str() == Some(s.prompt.as_str()) {
            report.prompt += 1;
            return Some(Value::String(params.prompt.to_string()));
        }

        if s.dimensions.iter().any(|d| matches_number(value, *d)) {
            // A dimension sentinel only means something under a
            // width/height key; elsewhere it is left alone.
            return match key.and_then(dimension_of_key) {
                Some(Dimension::Width) => {
                    report.width += 1;
                    Some(Value::from(params.size.width))
                }
                Some(Dimension::Height) => {
                    report.height += 1;
                    Some(Value::from(params.size.height))
                }
                None => None,
            };
        }

        if matches_number(value, s.frame_count) {
            report.frame_count += 1;
            return Some(Value::from(params.frame_count));
        }

        if value.as_str() == Some(s.source_image.as_str()) {
            report.source_image += 1;
            return Some(Value::String(params.source_image_name.to_string()));
        }

        None
    }
}

/// Match a JSON number or numeric string against an integer sentinel.
fn matches_number(value: &Value, sentinel: u64) -> bool {
    match value {
        Value::Number(n) => {
            n.as_u64() == Some(sentinel)
                || (n.is_f64() && n.as_f64() == Some(sentinel as f64))
        }
        Value::String(text) => text == &sentinel.to_string(),
        _ => false,
    }
}

fn dimension_of_key(key: &str) -> Option<Dimension> {
    let lower = key.to_ascii_lowercase();
    if lower.ends_with("width") {
        Some(Dimension::Width)
    } else if lower.ends_with("height") {
        Some(Dimension::Height)
    } else {
        None
    }
}
