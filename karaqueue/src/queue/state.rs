//! The queue sequence and every rule that mutates it.
//!
//! `QueueState` is plain data with synchronous methods; the actor owns the
//! only instance, so each method runs to completion before the next one
//! starts. Side effects (notifications, pipeline admissions, publisher
//! cleanup) are recorded as [`Effect`]s and executed by the actor afterwards.

use serde::{Deserialize, Serialize};
use url::Url;

use super::events::QueueEvent;
use crate::domain::{
    ItemId, ItemStatus, ItemView, PitchShift, QueueItem, Requester, TransitionPayload,
};
use crate::{Error, Result};

fn default_max_queued() -> usize {
    20
}

fn default_max_queued_per_user() -> usize {
    2
}

/// Admission bounds for the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Items awaiting playback across all users.
    #[serde(default = "default_max_queued")]
    pub max_queued: usize,
    /// Items awaiting playback per requester.
    #[serde(default = "default_max_queued_per_user")]
    pub max_queued_per_user: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queued: default_max_queued(),
            max_queued_per_user: default_max_queued_per_user(),
        }
    }
}

/// Work handed to the pipeline when an item is admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub id: ItemId,
    pub url: String,
    pub pitch_shift: PitchShift,
    pub requester: String,
}

/// Result of a `skip` command.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SkipOutcome {
    /// The item that was playing and is now done.
    pub finished: Option<ItemView>,
    /// The item promoted to playing.
    pub now_playing: Option<ItemView>,
    /// No item was ready; the next one to become ready will start playing.
    pub waiting: bool,
}

#[derive(Debug, Clone)]
pub(crate) enum Effect {
    Notify(QueueEvent),
    Admit(Admission),
    Cleanup(ItemId),
}

/// Statuses the pipeline is allowed to drive an item into.
fn is_pipeline_target(status: ItemStatus) -> bool {
    matches!(
        status,
        ItemStatus::Fetching | ItemStatus::Transcoding | ItemStatus::Ready | ItemStatus::Failed
    )
}

/// Playing and failed items no longer occupy a slot.
fn counts_toward_bounds(status: ItemStatus) -> bool {
    !matches!(status, ItemStatus::Playing | ItemStatus::Failed)
}

#[derive(Debug)]
pub struct QueueState {
    items: Vec<QueueItem>,
    next_id: u64,
    config: QueueConfig,
    play_requested: bool,
    effects: Vec<Effect>,
}

impl QueueState {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            items: Vec::new(),
            next_id: 1,
            config,
            play_requested: false,
            effects: Vec::new(),
        }
    }

    pub fn config(&self) -> QueueConfig {
        self.config
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn play_requested(&self) -> bool {
        self.play_requested
    }

    pub fn status(&self, id: ItemId) -> Option<ItemStatus> {
        self.items.iter().find(|i| i.id == id).map(|i| i.status)
    }

    pub fn views(&self) -> Vec<ItemView> {
        self.items.iter().map(QueueItem::view).collect()
    }

    pub(crate) fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    /// Validate and append a new `Pending` item.
    pub fn enqueue(
        &mut self,
        requester: &Requester,
        url: &str,
        pitch_shift: i32,
    ) -> Result<ItemView> {
        let pitch_shift = PitchShift::new(pitch_shift)?;
        let url = url.trim();
        Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url} ({e})")))?;

        let waiting = self
            .items
            .iter()
            .filter(|i| counts_toward_bounds(i.status))
            .count();
        if waiting >= self.config.max_queued {
            return Err(Error::QueueFull(self.config.max_queued));
        }
        let mine = self
            .items
            .iter()
            .filter(|i| i.requester == requester.id && counts_toward_bounds(i.status))
            .count();
        if mine >= self.config.max_queued_per_user {
            return Err(Error::UserQuotaExceeded(self.config.max_queued_per_user));
        }

        let id = ItemId(self.next_id);
        self.next_id += 1;
        let item = QueueItem::new(id, requester.id.as_str(), url, pitch_shift);
        let view = item.view();
        self.items.push(item);

        self.effects.push(Effect::Admit(Admission {
            id,
            url: url.to_string(),
            pitch_shift,
            requester: requester.id.clone(),
        }));
        self.notify(QueueEvent::Admitted { item: view.clone() });
        Ok(view)
    }

    /// Compare-and-set transition driven by the pipeline.
    pub fn advance(
        &mut self,
        id: ItemId,
        from: ItemStatus,
        to: ItemStatus,
        payload: TransitionPayload,
    ) -> Result<ItemView> {
        if !is_pipeline_target(to) || !from.can_transition_to(to) {
            return Err(Error::InvalidTransition { from, to });
        }
        let Some(idx) = self.position(id) else {
            return Err(self.missing(id, from));
        };
        let item = &mut self.items[idx];
        if item.status != from {
            return Err(Error::StaleTransition {
                id,
                expected: from,
                actual: Some(item.status),
            });
        }
        item.apply(to, payload);
        let view = item.view();

        self.notify(QueueEvent::Transitioned { id, from, to });
        if to == ItemStatus::Failed {
            let reason = view
                .failure_reason
                .clone()
                .unwrap_or_else(|| "unknown error".to_string());
            self.notify(QueueEvent::Failed { item: view, reason });
        } else if to == ItemStatus::Ready && self.play_requested && !self.has_playing() {
            self.promote_next();
        }

        self.view_of(id).ok_or(Error::NotFound(id))
    }

    /// Remove an item on behalf of its owner or a privileged requester.
    pub fn remove(&mut self, id: ItemId, requester: &Requester) -> Result<ItemView> {
        let idx = self.position(id).ok_or(Error::NotFound(id))?;
        let item = &mut self.items[idx];
        if !requester.may_manage(&item.requester) {
            return Err(Error::Permission(format!(
                "item {} belongs to another user",
                id
            )));
        }

        // Failed items are already terminal, they only need evicting.
        if item.status.is_terminal() {
            let view = item.view();
            self.evict(idx);
            return Ok(view);
        }

        let from = item.status;
        item.apply(ItemStatus::Removed, TransitionPayload::none());
        let view = item.view();
        self.evict(idx);
        self.notify(QueueEvent::Transitioned {
            id,
            from,
            to: ItemStatus::Removed,
        });
        self.notify(QueueEvent::Removed { item: view.clone() });

        if self.play_requested && !self.items.iter().any(|i| i.status.is_in_pipeline()) {
            self.play_requested = false;
        }
        Ok(view)
    }

    /// Finish the playing item and promote the next ready one.
    pub fn skip(&mut self) -> SkipOutcome {
        let mut finished = None;
        if let Some(idx) = self
            .items
            .iter()
            .position(|i| i.status == ItemStatus::Playing)
        {
            let item = &mut self.items[idx];
            item.apply(ItemStatus::Done, TransitionPayload::none());
            let view = item.view();
            self.evict(idx);
            self.notify(QueueEvent::Transitioned {
                id: view.id,
                from: ItemStatus::Playing,
                to: ItemStatus::Done,
            });
            self.notify(QueueEvent::Finished { item: view.clone() });
            finished = Some(view);
        }

        let now_playing = self.promote_next();
        let waiting =
            now_playing.is_none() && self.items.iter().any(|i| i.status.is_in_pipeline());
        self.play_requested = waiting;

        SkipOutcome {
            finished,
            now_playing,
            waiting,
        }
    }

    /// Move an item to a 0-based position.
    pub fn reorder(
        &mut self,
        id: ItemId,
        position: usize,
        requester: &Requester,
    ) -> Result<ItemView> {
        if !requester.privileged {
            return Err(Error::Permission(
                "reordering the queue requires elevated privilege".to_string(),
            ));
        }
        let idx = self.position(id).ok_or(Error::NotFound(id))?;
        let len = self.items.len();
        if position >= len {
            return Err(Error::InvalidPosition { position, len });
        }
        let item = self.items.remove(idx);
        let view = item.view();
        self.items.insert(position, item);
        Ok(view)
    }

    /// Drop every item. Identifiers keep counting from where they were.
    pub fn reset(&mut self, requester: &Requester) -> Result<usize> {
        if !requester.privileged {
            return Err(Error::Permission(
                "resetting the queue requires elevated privilege".to_string(),
            ));
        }
        let count = self.items.len();
        for mut item in std::mem::take(&mut self.items) {
            if !item.status.is_terminal() {
                item.apply(ItemStatus::Removed, TransitionPayload::none());
            }
            if item.published.is_some() {
                self.effects.push(Effect::Cleanup(item.id));
            }
        }
        self.play_requested = false;
        self.notify(QueueEvent::Reset { count });
        Ok(count)
    }

    fn notify(&mut self, event: QueueEvent) {
        self.effects.push(Effect::Notify(event));
    }

    fn position(&self, id: ItemId) -> Option<usize> {
        self.items.iter().position(|i| i.id == id)
    }

    fn view_of(&self, id: ItemId) -> Option<ItemView> {
        self.items.iter().find(|i| i.id == id).map(QueueItem::view)
    }

    fn has_playing(&self) -> bool {
        self.items.iter().any(|i| i.status == ItemStatus::Playing)
    }

    /// Ids handed out earlier but no longer present were evicted.
    fn missing(&self, id: ItemId, expected: ItemStatus) -> Error {
        if (1..self.next_id).contains(&id.0) {
            Error::StaleTransition {
                id,
                expected,
                actual: None,
            }
        } else {
            Error::NotFound(id)
        }
    }

    fn evict(&mut self, idx: usize) -> QueueItem {
        let item = self.items.remove(idx);
        if item.published.is_some() {
            self.effects.push(Effect::Cleanup(item.id));
        }
        item
    }

    /// Promote the first ready item in sequence order, evicting failed items
    /// that playback moves past.
    fn promote_next(&mut self) -> Option<ItemView> {
        let ready = self
            .items
            .iter()
            .position(|i| i.status == ItemStatus::Ready)?;
        let passed: Vec<usize> = (0..ready)
            .filter(|&i| self.items[i].status == ItemStatus::Failed)
            .collect();
        for idx in passed.iter().rev() {
            self.evict(*idx);
        }

        let item = &mut self.items[ready - passed.len()];
        item.apply(ItemStatus::Playing, TransitionPayload::none());
        let view = item.view();
        self.play_requested = false;
        self.notify(QueueEvent::Transitioned {
            id: view.id,
            from: ItemStatus::Ready,
            to: ItemStatus::Playing,
        });
        self.notify(QueueEvent::NowPlaying { item: view.clone() });
        Some(view)
    }
}
