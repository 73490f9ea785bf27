//! Session Interface: turns user commands into queue calls and renders the
//! results.
//!
//! Transports (the HTTP API, a chat bot) resolve who the caller is and hand
//! a [`SessionCommand`] to [`SessionService::execute`]. Terminal
//! notifications are delivered separately through [`SessionService::spawn_notifier`].

mod render;

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{ItemId, ItemView, Requester};
use crate::queue::{QueueEvent, QueueHandle, SkipOutcome};
use crate::{Error, Result};

pub use render::{
    HELP_LINES, render_event, render_help, render_item_line, render_now_playing, render_queue,
    render_skip,
};

/// A command from the session contract.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SessionCommand {
    Add {
        url: String,
        #[serde(default)]
        pitch_shift: i32,
    },
    List,
    Skip,
    Remove {
        id: ItemId,
    },
    /// `position` is 1-based, as shown by `list`.
    Reorder {
        id: ItemId,
        position: usize,
    },
    Reset,
    Help,
}

/// Result of a command, with the data a transport may want to show.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionReply {
    Added {
        item: ItemView,
    },
    Queue {
        items: Vec<ItemView>,
    },
    Skipped {
        #[serde(flatten)]
        outcome: SkipOutcome,
    },
    Removed {
        item: ItemView,
    },
    Moved {
        item: ItemView,
        items: Vec<ItemView>,
    },
    Reset {
        count: usize,
    },
    Help,
}

impl SessionReply {
    /// Chat-style text for this reply.
    pub fn message(&self) -> String {
        match self {
            Self::Added { item } => format!("Loading `{}`...", item.url),
            Self::Queue { items } => render_queue(items),
            Self::Skipped { outcome } => render_skip(outcome),
            Self::Removed { item } => format!(
                "Successfully deleted `{}` from the queue.",
                item.display_name
            ),
            Self::Moved { items, .. } => render_queue(items),
            Self::Reset { count } => format!("Queue cleared, {} songs removed.", count),
            Self::Help => render_help(),
        }
    }
}

/// Message shown to a user for a failed command.
pub fn render_error(error: &Error) -> String {
    match error {
        Error::QueueFull(_) => "Queue is full! Remove some songs first.".to_string(),
        Error::UserQuotaExceeded(max) => {
            format!("Each user may only have {} songs in the queue!", max)
        }
        Error::InvalidPosition { .. } => "Invalid index!".to_string(),
        Error::NotFound(_) => "No such song in the queue.".to_string(),
        Error::ManagerStopped => "The queue is shutting down.".to_string(),
        e if e.is_user_visible() => e.to_string(),
        _ => "Something went wrong.".to_string(),
    }
}

/// Command execution against the queue.
#[derive(Clone)]
pub struct SessionService {
    queue: QueueHandle,
    admins: Arc<HashSet<String>>,
}

impl SessionService {
    pub fn new(queue: QueueHandle, admins: impl IntoIterator<Item = String>) -> Self {
        Self {
            queue,
            admins: Arc::new(admins.into_iter().collect()),
        }
    }

    pub fn queue(&self) -> &QueueHandle {
        &self.queue
    }

    /// Resolve a caller id to a requester with its privilege.
    pub fn requester(&self, user_id: &str) -> Requester {
        if self.admins.contains(user_id) {
            Requester::admin(user_id)
        } else {
            Requester::user(user_id)
        }
    }

    pub async fn execute(&self, user_id: &str, command: SessionCommand) -> Result<SessionReply> {
        let requester = self.requester(user_id);
        debug!(user = %requester.id, ?command, "Session command");

        match command {
            SessionCommand::Add { url, pitch_shift } => {
                let item = self.queue.enqueue(requester, url, pitch_shift).await?;
                Ok(SessionReply::Added { item })
            }
            SessionCommand::List => Ok(SessionReply::Queue {
                items: self.queue.snapshot().to_vec(),
            }),
            SessionCommand::Skip => {
                let outcome = self.queue.skip().await?;
                Ok(SessionReply::Skipped { outcome })
            }
            SessionCommand::Remove { id } => {
                let item = self.queue.remove(id, requester).await?;
                Ok(SessionReply::Removed { item })
            }
            SessionCommand::Reorder { id, position } => {
                let Some(index) = position.checked_sub(1) else {
                    return Err(Error::InvalidPosition {
                        position,
                        len: self.queue.snapshot().len(),
                    });
                };
                let item = self.queue.reorder(id, index, requester).await?;
                Ok(SessionReply::Moved {
                    item,
                    items: self.queue.snapshot().to_vec(),
                })
            }
            SessionCommand::Reset => {
                let count = self.queue.reset(requester).await?;
                Ok(SessionReply::Reset { count })
            }
            SessionCommand::Help => Ok(SessionReply::Help),
        }
    }

    /// Log user-facing notifications for terminal events until `token` is
    /// cancelled or the queue goes away.
    pub fn spawn_notifier(&self, token: CancellationToken) -> JoinHandle<()> {
        let rx = self.queue.subscribe();
        tokio::spawn(notify_loop(rx, token))
    }
}

async fn notify_loop(mut rx: broadcast::Receiver<QueueEvent>, token: CancellationToken) {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("Session notifier shutting down");
                break;
            }
            result = rx.recv() => match result {
                Ok(event) => {
                    if !(event.is_terminal() || matches!(event, QueueEvent::NowPlaying { .. })) {
                        continue;
                    }
                    if let Some(line) = render_event(&event) {
                        info!(item_id = ?event.item_id(), "{}", line);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Session notifier lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Queue event channel closed");
                    break;
                }
            }
        }
    }
}
