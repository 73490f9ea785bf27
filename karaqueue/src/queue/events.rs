//! Lifecycle notifications emitted by the queue actor.

use serde::Serialize;

use crate::domain::{ItemId, ItemStatus, ItemView};

/// Default capacity of the event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A change observed by the queue actor.
///
/// Terminal notifications (`Failed`, `Finished`, `Removed`) are emitted at most
/// once per item since terminal statuses have no outgoing edges.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    Admitted {
        item: ItemView,
    },
    Transitioned {
        id: ItemId,
        from: ItemStatus,
        to: ItemStatus,
    },
    Failed {
        item: ItemView,
        reason: String,
    },
    NowPlaying {
        item: ItemView,
    },
    Finished {
        item: ItemView,
    },
    Removed {
        item: ItemView,
    },
    Reset {
        count: usize,
    },
}

impl QueueEvent {
    /// The item this event refers to, if any.
    pub fn item_id(&self) -> Option<ItemId> {
        match self {
            Self::Admitted { item }
            | Self::Failed { item, .. }
            | Self::NowPlaying { item }
            | Self::Finished { item }
            | Self::Removed { item } => Some(item.id),
            Self::Transitioned { id, .. } => Some(*id),
            Self::Reset { .. } => None,
        }
    }

    /// Whether this event reports an item reaching a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Failed { .. } | Self::Finished { .. } | Self::Removed { .. }
        )
    }
}
