//! Queue item entity and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::PitchShift;

/// Process-unique, monotonically assigned item identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a queue item.
///
/// ```text
/// Pending -> Fetching -> Transcoding -> Ready -> Playing -> Done
///               |            |           |
///               +------------+-----------+--> Failed
/// any non-terminal --> Removed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Fetching,
    Transcoding,
    Ready,
    Playing,
    Done,
    Failed,
    Removed,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Transcoding => "transcoding",
            Self::Ready => "ready",
            Self::Playing => "playing",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Removed => "removed",
        }
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Removed)
    }

    /// Whether the pipeline still has work to do for an item in this status.
    #[inline]
    pub fn is_in_pipeline(self) -> bool {
        matches!(self, Self::Pending | Self::Fetching | Self::Transcoding)
    }

    /// Edges of the state machine. Anything else is a regression or a skip.
    pub fn can_transition_to(self, next: ItemStatus) -> bool {
        use ItemStatus::*;
        match (self, next) {
            (Pending, Fetching)
            | (Fetching, Transcoding)
            | (Transcoding, Ready)
            | (Ready, Playing)
            | (Playing, Done) => true,
            (Fetching | Transcoding | Ready, Failed) => true,
            (from, Removed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Files the publisher placed in the served directory for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedMedia {
    pub dir: PathBuf,
    pub media_path: PathBuf,
    pub html_path: PathBuf,
    pub served_url: String,
    pub duration_secs: f64,
}

/// Data carried alongside a pipeline transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionPayload {
    /// Title learned during source resolution.
    pub title: Option<String>,
    /// Published output, set on `Transcoding -> Ready`.
    pub published: Option<PublishedMedia>,
    /// Human-readable failure reason, set on `-> Failed`.
    pub failure_reason: Option<String>,
}

impl TransitionPayload {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn published(published: PublishedMedia) -> Self {
        Self {
            published: Some(published),
            ..Default::default()
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            failure_reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// An entry in the queue. Only the queue actor mutates these.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: ItemId,
    pub requester: String,
    pub url: String,
    pub title: Option<String>,
    pub pitch_shift: PitchShift,
    pub status: ItemStatus,
    pub published: Option<PublishedMedia>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub failure_reason: Option<String>,
}

impl QueueItem {
    pub fn new(
        id: ItemId,
        requester: impl Into<String>,
        url: impl Into<String>,
        pitch_shift: PitchShift,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            requester: requester.into(),
            url: url.into(),
            title: None,
            pitch_shift,
            status: ItemStatus::Pending,
            published: None,
            created_at: now,
            updated_at: now,
            failure_reason: None,
        }
    }

    /// Title with the pitch shift appended, e.g. `Song [+2]`.
    pub fn display_name(&self) -> String {
        let base = self.title.as_deref().unwrap_or(&self.url);
        if self.pitch_shift.is_zero() {
            base.to_string()
        } else {
            format!("{} [{}]", base, self.pitch_shift)
        }
    }

    /// Apply a transition that has already been validated.
    pub(crate) fn apply(&mut self, to: ItemStatus, payload: TransitionPayload) {
        self.status = to;
        self.updated_at = Utc::now();
        if let Some(title) = payload.title {
            self.title = Some(title);
        }
        if let Some(published) = payload.published {
            self.published = Some(published);
        }
        if let Some(reason) = payload.failure_reason {
            self.failure_reason = Some(reason);
        }
    }

    pub fn view(&self) -> ItemView {
        ItemView {
            id: self.id,
            requester: self.requester.clone(),
            url: self.url.clone(),
            title: self.title.clone(),
            display_name: self.display_name(),
            pitch_shift: self.pitch_shift.semitones(),
            status: self.status,
            served_url: self.published.as_ref().map(|p| p.served_url.clone()),
            duration_secs: self.published.as_ref().map(|p| p.duration_secs),
            created_at: self.created_at,
            updated_at: self.updated_at,
            failure_reason: self.failure_reason.clone(),
        }
    }
}

/// Immutable, serializable copy of an item handed out to readers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemView {
    pub id: ItemId,
    pub requester: String,
    pub url: String,
    pub title: Option<String>,
    pub display_name: String,
    pub pitch_shift: i32,
    pub status: ItemStatus,
    pub served_url: Option<String>,
    pub duration_secs: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub failure_reason: Option<String>,
}
