//! Content plans produced by an external planner.
//!
//! The planner (typically a language model) answers in free text that
//! contains one JSON object. Everything from the first `{` to the last
//! `}` is taken as that object.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use framechain_core::segment::{LongVideoRequest, Segment, SourceMedia};

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// The planner's answer contains no `{ ... }` span.
    #[error("planner response contains no JSON object")]
    NoJson,

    /// The JSON span does not describe a plan.
    #[error("invalid content plan: {0}")]
    Parse(#[from] serde_json::Error),

    /// The planner itself failed.
    #[error("planner failed: {0}")]
    Planner(String),
}

/// One planned segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedSegment {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(alias = "frame_count")]
    pub frames: u32,
    /// Free-form role such as "hook" or "conclusion".
    #[serde(default)]
    pub purpose: Option<String>,
}

/// A video plan: metadata plus the segment list to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPlan {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Overall prompt, used where segments give none.
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub segments: Vec<PlannedSegment>,
    #[serde(default)]
    pub hashtags: Vec<String>,
}

impl ContentPlan {
    /// Turn the plan into a request starting from `source`.
    ///
    /// The first segment's prompt, falling back to the plan prompt,
    /// becomes the initial prompt. Limits are not checked here; the
    /// orchestrator validates the request before rendering.
    pub fn into_request(self, source: SourceMedia) -> LongVideoRequest {
        let first_prompt = self
            .segments
            .first()
            .and_then(|s| s.prompt.as_deref())
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        let initial_prompt = first_prompt.unwrap_or_else(|| self.prompt.trim().to_string());

        let segments = self
            .segments
            .into_iter()
            .map(|s| Segment {
                prompt: s.prompt,
                frame_count: s.frames,
            })
            .collect();

        LongVideoRequest {
            initial_prompt,
            source,
            segments,
        }
    }
}

/// Extract and parse the plan object embedded in `text`.
pub fn parse_content_plan(text: &str) -> Result<ContentPlan, PlanError> {
    let start = text.find('{').ok_or(PlanError::NoJson)?;
    let end = text.rfind('}').ok_or(PlanError::NoJson)?;
    if end < start {
        return Err(PlanError::NoJson);
    }
    Ok(serde_json::from_str(&text[start..=end])?)
}

/// Produces content plans for a topic.
#[async_trait]
pub trait ContentPlanner: Send + Sync {
    async fn plan(&self, topic: &str) -> Result<ContentPlan, PlanError>;
}
