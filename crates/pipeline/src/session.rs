//! Per-session bookkeeping for conversational front ends.
//!
//! A [`SessionStore`] is created once and shared (it is cheap to clone).
//! Each session may have at most one long-video request in flight, owned
//! through an [`InFlightGuard`], plus one [`SegmentCollector`] gathering
//! the next request.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use framechain_core::segment::{
    validate_frame_count, validate_request, FrameLimits, LongVideoRequest, Segment, SourceMedia,
};

use crate::error::PipelineError;

/// Extensions treated as an existing video to extend rather than an image.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "webm", "avi"];

/// Input that finishes segment collection.
pub const DONE_COMMAND: &str = "done";

/// Segment prompt that reuses the previous prompt.
pub const INHERIT_PROMPT: &str = "-";

/* --------------------------------------------------------------------------
Session store
-------------------------------------------------------------------------- */

#[derive(Default)]
struct SessionSlot {
    /// Token and generation of the in-flight request, if any.
    in_flight: Option<(u64, CancellationToken)>,
    collector: Option<SegmentCollector>,
}

impl SessionSlot {
    fn is_empty(&self) -> bool {
        self.in_flight.is_none() && self.collector.is_none()
    }
}

#[derive(Default)]
struct StoreInner {
    sessions: HashMap<String, SessionSlot>,
    next_generation: u64,
}

/// Session state keyed by session id.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the session's single in-flight slot.
    pub fn begin(&self, session_id: &str) -> Result<InFlightGuard, PipelineError> {
        let mut inner = self.lock();
        inner.next_generation += 1;
        let generation = inner.next_generation;

        let slot = inner.sessions.entry(session_id.to_string()).or_default();
        if slot.in_flight.is_some() {
            tracing::warn!(session_id, "Rejected request, session busy");
            return Err(PipelineError::SessionBusy(session_id.to_string()));
        }
        let token = CancellationToken::new();
        slot.in_flight = Some((generation, token.clone()));
        tracing::debug!(session_id, generation, "Session request started");

        Ok(InFlightGuard {
            store: self.clone(),
            session_id: session_id.to_string(),
            generation,
            token,
        })
    }

    /// Whether the session has a request in flight.
    pub fn is_busy(&self, session_id: &str) -> bool {
        self.lock()
            .sessions
            .get(session_id)
            .is_some_and(|slot| slot.in_flight.is_some())
    }

    /// Request cancellation of the session's in-flight request. Returns
    /// `false` when there is nothing to cancel.
    pub fn cancel(&self, session_id: &str) -> bool {
        let inner = self.lock();
        match inner.sessions.get(session_id).and_then(|s| s.in_flight.as_ref()) {
            Some((_, token)) => {
                token.cancel();
                tracing::info!(session_id, "Session request cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Start (or restart) collecting a request. Returns the first question.
    pub fn start_collecting(&self, session_id: &str, limits: FrameLimits) -> String {
        let collector = SegmentCollector::new(limits);
        let question = collector.question();
        self.lock()
            .sessions
            .entry(session_id.to_string())
            .or_default()
            .collector = Some(collector);
        question
    }

    /// Whether the session is in the middle of collecting a request.
    pub fn is_collecting(&self, session_id: &str) -> bool {
        self.lock()
            .sessions
            .get(session_id)
            .is_some_and(|slot| slot.collector.is_some())
    }

    /// Feed one user message to the session's collector. `None` when the
    /// session is not collecting. A completed collector is removed.
    pub fn feed(&self, session_id: &str, input: &str) -> Option<CollectorReply> {
        let mut inner = self.lock();
        let slot = inner.sessions.get_mut(session_id)?;
        let reply = slot.collector.as_mut()?.feed(input);
        if matches!(reply, CollectorReply::Complete(_)) {
            slot.collector = None;
        }
        if slot.is_empty() {
            inner.sessions.remove(session_id);
        }
        Some(reply)
    }

    /// Drop the session's collector. Returns `false` if there was none.
    pub fn abandon(&self, session_id: &str) -> bool {
        let mut inner = self.lock();
        let Some(slot) = inner.sessions.get_mut(session_id) else {
            return false;
        };
        let had = slot.collector.take().is_some();
        if slot.is_empty() {
            inner.sessions.remove(session_id);
        }
        had
    }

    fn release(&self, session_id: &str, generation: u64) {
        let mut inner = self.lock();
        let Some(slot) = inner.sessions.get_mut(session_id) else {
            return;
        };
        if slot.in_flight.as_ref().is_some_and(|(g, _)| *g == generation) {
            slot.in_flight = None;
            tracing::debug!(session_id, generation, "Session request finished");
        }
        if slot.is_empty() {
            inner.sessions.remove(session_id);
        }
    }
}

/// Ownership of a session's in-flight slot. Released on drop.
pub struct InFlightGuard {
    store: SessionStore,
    session_id: String,
    generation: u64,
    token: CancellationToken,
}

impl InFlightGuard {
    /// Cancellation token for the run holding this slot.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl fmt::Debug for InFlightGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlightGuard")
            .field("session_id", &self.session_id)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.store.release(&self.session_id, self.generation);
    }
}

/* --------------------------------------------------------------------------
Segment collector
-------------------------------------------------------------------------- */

/// What the collector is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorStep {
    InitialPrompt,
    SourceMedia,
    SegmentPrompt,
    FrameCount,
}

/// Response to one piece of user input.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectorReply {
    /// Input accepted; ask this next.
    Ask(String),
    /// Input rejected; the same question is asked again.
    Invalid { reason: String, question: String },
    /// Collection finished with a validated request.
    Complete(LongVideoRequest),
}

/// Gathers a [`LongVideoRequest`] one message at a time:
/// initial prompt, source media, then (segment prompt, frame count)
/// pairs until `done`.
#[derive(Debug, Clone)]
pub struct SegmentCollector {
    limits: FrameLimits,
    step: CollectorStep,
    initial_prompt: String,
    source: Option<SourceMedia>,
    segments: Vec<Segment>,
    /// Prompt of the segment whose frame count is being asked for.
    pending_prompt: Option<String>,
}

impl SegmentCollector {
    pub fn new(limits: FrameLimits) -> Self {
        Self {
            limits,
            step: CollectorStep::InitialPrompt,
            initial_prompt: String::new(),
            source: None,
            segments: Vec::new(),
            pending_prompt: None,
        }
    }

    pub fn step(&self) -> CollectorStep {
        self.step
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    fn total_frames(&self) -> u64 {
        self.segments.iter().map(|s| s.frame_count as u64).sum()
    }

    fn remaining_frames(&self) -> u64 {
        (self.limits.max_total_frames as u64).saturating_sub(self.total_frames())
    }

    /// The question for the current step.
    pub fn question(&self) -> String {
        match self.step {
            CollectorStep::InitialPrompt => "Describe the opening scene of the video.".to_string(),
            CollectorStep::SourceMedia => {
                "Send the path of the starting image, or of a video to extend.".to_string()
            }
            CollectorStep::SegmentPrompt => format!(
                "Segment {}: enter its prompt ('{INHERIT_PROMPT}' to reuse the previous one), or '{DONE_COMMAND}' to finish.",
                self.segments.len() + 1
            ),
            CollectorStep::FrameCount => format!(
                "Segment {}: how many frames ({}-{}, {} left in total)?",
                self.segments.len() + 1,
                self.limits.min_segment_frames,
                self.limits.max_segment_frames,
                self.remaining_frames()
            ),
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> CollectorReply {
        CollectorReply::Invalid {
            reason: reason.into(),
            question: self.question(),
        }
    }

    fn advance(&mut self, step: CollectorStep) -> CollectorReply {
        self.step = step;
        CollectorReply::Ask(self.question())
    }

    pub fn feed(&mut self, input: &str) -> CollectorReply {
        let input = input.trim();
        match self.step {
            CollectorStep::InitialPrompt => {
                if input.is_empty() {
                    return self.invalid("The opening prompt cannot be empty.");
                }
                self.initial_prompt = input.to_string();
                self.advance(CollectorStep::SourceMedia)
            }
            CollectorStep::SourceMedia => {
                if input.is_empty() {
                    return self.invalid("A starting image or video is required.");
                }
                self.source = Some(classify_source(PathBuf::from(input)));
                self.advance(CollectorStep::SegmentPrompt)
            }
            CollectorStep::SegmentPrompt => {
                if input.eq_ignore_ascii_case(DONE_COMMAND) {
                    return self.finish();
                }
                if self.remaining_frames() < self.limits.min_segment_frames as u64 {
                    return self.invalid(format!(
                        "The {}-frame budget is used up; send '{DONE_COMMAND}'.",
                        self.limits.max_total_frames
                    ));
                }
                self.pending_prompt = if input.is_empty() || input == INHERIT_PROMPT {
                    None
                } else {
                    Some(input.to_string())
                };
                self.advance(CollectorStep::FrameCount)
            }
            CollectorStep::FrameCount => {
                let Ok(frames) = input.parse::<u32>() else {
                    return self.invalid(format!("'{input}' is not a whole number."));
                };
                if let Err(e) = validate_frame_count(frames, &self.limits) {
                    return self.invalid(e.to_string());
                }
                if frames as u64 > self.remaining_frames() {
                    return self.invalid(format!(
                        "Only {} frames are left in the budget.",
                        self.remaining_frames()
                    ));
                }
                self.segments.push(Segment {
                    prompt: self.pending_prompt.take(),
                    frame_count: frames,
                });
                self.advance(CollectorStep::SegmentPrompt)
            }
        }
    }

    fn finish(&mut self) -> CollectorReply {
        let Some(source) = self.source.clone() else {
            return self.invalid("No starting image or video was given.");
        };
        if self.segments.is_empty() {
            return self.invalid("Add at least one segment first.");
        }
        let request = LongVideoRequest {
            initial_prompt: self.initial_prompt.clone(),
            source,
            segments: self.segments.clone(),
        };
        match validate_request(&request, &self.limits) {
            Ok(()) => CollectorReply::Complete(request),
            Err(e) => self.invalid(e.to_string()),
        }
    }
}

/// Treat paths with a known video extension as a video to extend.
pub fn classify_source(path: PathBuf) -> SourceMedia {
    let is_video = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| VIDEO_EXTENSIONS.iter().any(|v| v.eq_ignore_ascii_case(ext)));
    if is_video {
        SourceMedia::Video(path)
    } else {
        SourceMedia::Image(path)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn collector() -> SegmentCollector {
        let mut c = SegmentCollector::new(FrameLimits::default());
        c.feed("a castle at dawn");
        c.feed("/in/castle.png");
        c
    }

    #[test]
    fn collects_segments_with_inherited_prompt() {
        let mut c = collector();
        assert_matches!(c.feed("the gates open"), CollectorReply::Ask(_));
        assert_matches!(c.feed("60"), CollectorReply::Ask(_));
        assert_matches!(c.feed("-"), CollectorReply::Ask(_));
        assert_matches!(c.feed("40"), CollectorReply::Ask(_));

        let CollectorReply::Complete(request) = c.feed("DONE") else {
            panic!("expected a complete request");
        };
        assert_eq!(request.initial_prompt, "a castle at dawn");
        assert_eq!(request.source, SourceMedia::Image("/in/castle.png".into()));
        assert_eq!(
            request.segments,
            vec![Segment::new("the gates open", 60), Segment::inheriting(40)]
        );
    }

    #[test]
    fn video_path_selects_extend_mode() {
        let mut c = SegmentCollector::new(FrameLimits::default());
        c.feed("p");
        c.feed("/clips/previous.MP4");
        c.feed("-");
        c.feed("30");
        let CollectorReply::Complete(request) = c.feed("done") else {
            panic!("expected a complete request");
        };
        assert_matches!(request.source, SourceMedia::Video(_));
    }

    #[test]
    fn out_of_range_frame_count_re_asks() {
        let mut c = collector();
        c.feed("scene");
        assert_matches!(c.feed("126"), CollectorReply::Invalid { .. });
        assert_matches!(c.feed("1"), CollectorReply::Invalid { .. });
        assert_matches!(c.feed("lots"), CollectorReply::Invalid { .. });
        assert_eq!(c.step(), CollectorStep::FrameCount);
        assert_matches!(c.feed("125"), CollectorReply::Ask(_));
        assert_eq!(c.segments().len(), 1);
    }

    #[test]
    fn total_budget_is_enforced_at_input_time() {
        let limits = FrameLimits {
            max_total_frames: 100,
            ..FrameLimits::default()
        };
        let mut c = SegmentCollector::new(limits);
        c.feed("p");
        c.feed("/in/a.png");
        c.feed("one");
        c.feed("90");
        c.feed("two");
        assert_matches!(
            c.feed("20"),
            CollectorReply::Invalid { reason, .. } if reason.contains("10 frames")
        );
        assert_matches!(c.feed("10"), CollectorReply::Ask(_));
        assert_matches!(c.feed("three"), CollectorReply::Invalid { .. });
    }

    #[test]
    fn done_without_segments_is_rejected() {
        let mut c = collector();
        assert_matches!(c.feed("done"), CollectorReply::Invalid { .. });
    }

    #[test]
    fn empty_opening_prompt_is_rejected() {
        let mut c = SegmentCollector::new(FrameLimits::default());
        assert_matches!(c.feed("   "), CollectorReply::Invalid { .. });
        assert_eq!(c.step(), CollectorStep::InitialPrompt);
    }

    #[test]
    fn second_begin_is_busy_until_guard_drops() {
        let store = SessionStore::new();
        let guard = store.begin("chat-1").unwrap();
        assert!(store.is_busy("chat-1"));
        assert_matches!(store.begin("chat-1"), Err(PipelineError::SessionBusy(id)) if id == "chat-1");
        assert!(store.begin("chat-2").is_ok());

        drop(guard);
        assert!(!store.is_busy("chat-1"));
        assert!(store.begin("chat-1").is_ok());
    }

    #[test]
    fn guard_debug_names_its_session() {
        let store = SessionStore::new();
        let guard = store.begin("chat-7").unwrap();
        let shown = format!("{guard:?}");
        assert!(shown.contains("chat-7"));
        assert!(shown.contains("generation"));
    }

    #[test]
    fn cancel_trips_the_in_flight_token() {
        let store = SessionStore::new();
        assert!(!store.cancel("chat-1"));
        let guard = store.begin("chat-1").unwrap();
        let token = guard.token();
        assert!(store.cancel("chat-1"));
        assert!(token.is_cancelled());
    }

    #[test]
    fn store_drives_collector_to_completion() {
        let store = SessionStore::new();
        assert_eq!(store.feed("chat-1", "hello"), None);

        store.start_collecting("chat-1", FrameLimits::default());
        assert!(store.is_collecting("chat-1"));
        for input in ["opening", "/in/a.png", "scene", "50"] {
            assert_matches!(store.feed("chat-1", input), Some(CollectorReply::Ask(_)));
        }
        assert_matches!(store.feed("chat-1", "done"), Some(CollectorReply::Complete(_)));
        assert!(!store.is_collecting("chat-1"));
    }

    #[test]
    fn abandon_discards_collector() {
        let store = SessionStore::new();
        store.start_collecting("chat-1", FrameLimits::default());
        assert!(store.abandon("chat-1"));
        assert!(!store.abandon("chat-1"));
        assert_eq!(store.feed("chat-1", "anything"), None);
    }
}
