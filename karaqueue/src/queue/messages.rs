//! Commands accepted by the queue actor.

use tokio::sync::oneshot;

use super::state::SkipOutcome;
use crate::Result;
use crate::domain::{ItemId, ItemStatus, ItemView, Requester, TransitionPayload};

/// Messages that can be sent to the queue actor. Every command carries a
/// oneshot reply channel; the reply is sent after the snapshot is updated.
#[derive(Debug)]
pub enum QueueCommand {
    Enqueue {
        requester: Requester,
        url: String,
        pitch_shift: i32,
        reply: oneshot::Sender<Result<ItemView>>,
    },
    Advance {
        id: ItemId,
        from: ItemStatus,
        to: ItemStatus,
        payload: TransitionPayload,
        reply: oneshot::Sender<Result<ItemView>>,
    },
    Remove {
        id: ItemId,
        requester: Requester,
        reply: oneshot::Sender<Result<ItemView>>,
    },
    Skip {
        reply: oneshot::Sender<SkipOutcome>,
    },
    Reorder {
        id: ItemId,
        position: usize,
        requester: Requester,
        reply: oneshot::Sender<Result<ItemView>>,
    },
    Reset {
        requester: Requester,
        reply: oneshot::Sender<Result<usize>>,
    },
    Status {
        id: ItemId,
        reply: oneshot::Sender<Option<ItemStatus>>,
    },
}

impl QueueCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Enqueue { .. } => "enqueue",
            Self::Advance { .. } => "advance",
            Self::Remove { .. } => "remove",
            Self::Skip { .. } => "skip",
            Self::Reorder { .. } => "reorder",
            Self::Reset { .. } => "reset",
            Self::Status { .. } => "status",
        }
    }
}
