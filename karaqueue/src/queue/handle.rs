//! Cloneable handle to the queue actor.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::events::QueueEvent;
use super::messages::QueueCommand;
use super::state::SkipOutcome;
use crate::domain::{ItemId, ItemStatus, ItemView, Requester, TransitionPayload};
use crate::{Error, Result};

/// Default mailbox capacity for the queue actor.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// A handle to the queue actor.
///
/// Mutations are sent as [`QueueCommand`]s and answered over a oneshot
/// channel. Reads are served from the latest published snapshot.
#[derive(Clone)]
pub struct QueueHandle {
    sender: mpsc::Sender<QueueCommand>,
    snapshot: watch::Receiver<Arc<Vec<ItemView>>>,
    events: broadcast::Sender<QueueEvent>,
    cancellation_token: CancellationToken,
}

impl QueueHandle {
    pub(crate) fn new(
        sender: mpsc::Sender<QueueCommand>,
        snapshot: watch::Receiver<Arc<Vec<ItemView>>>,
        events: broadcast::Sender<QueueEvent>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            sender,
            snapshot,
            events,
            cancellation_token,
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> QueueCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(make(reply))
            .await
            .map_err(|_| Error::ManagerStopped)?;
        rx.await.map_err(|_| Error::ManagerStopped)
    }

    /// Admit a new item as `Pending`.
    pub async fn enqueue(
        &self,
        requester: Requester,
        url: impl Into<String>,
        pitch_shift: i32,
    ) -> Result<ItemView> {
        let url = url.into();
        self.request(|reply| QueueCommand::Enqueue {
            requester,
            url,
            pitch_shift,
            reply,
        })
        .await?
    }

    /// Compare-and-set transition. Fails with [`Error::StaleTransition`] when
    /// the item is no longer in `from`.
    pub async fn advance(
        &self,
        id: ItemId,
        from: ItemStatus,
        to: ItemStatus,
        payload: TransitionPayload,
    ) -> Result<ItemView> {
        self.request(|reply| QueueCommand::Advance {
            id,
            from,
            to,
            payload,
            reply,
        })
        .await?
    }

    pub async fn remove(&self, id: ItemId, requester: Requester) -> Result<ItemView> {
        self.request(|reply| QueueCommand::Remove {
            id,
            requester,
            reply,
        })
        .await?
    }

    pub async fn skip(&self) -> Result<SkipOutcome> {
        self.request(|reply| QueueCommand::Skip { reply }).await
    }

    /// Move an item to a 0-based position. Privileged.
    pub async fn reorder(
        &self,
        id: ItemId,
        position: usize,
        requester: Requester,
    ) -> Result<ItemView> {
        self.request(|reply| QueueCommand::Reorder {
            id,
            position,
            requester,
            reply,
        })
        .await?
    }

    /// Drop every item. Privileged.
    pub async fn reset(&self, requester: Requester) -> Result<usize> {
        self.request(|reply| QueueCommand::Reset { requester, reply })
            .await?
    }

    /// Current status of a live item, `None` once it has been evicted.
    pub async fn status(&self, id: ItemId) -> Result<Option<ItemStatus>> {
        self.request(|reply| QueueCommand::Status { id, reply })
            .await
    }

    /// Consistent point-in-time copy of the queue.
    pub fn snapshot(&self) -> Arc<Vec<ItemView>> {
        self.snapshot.borrow().clone()
    }

    /// Receiver that resolves whenever a new snapshot is published.
    pub fn watch(&self) -> watch::Receiver<Arc<Vec<ItemView>>> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Ask the actor to stop after the command it is handling.
    pub fn stop(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancellation_token.is_cancelled() || self.sender.is_closed()
    }
}
