//! The queue actor: owns [`QueueState`] and serializes every mutation.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{EVENT_CHANNEL_CAPACITY, QueueEvent};
use super::handle::{DEFAULT_MAILBOX_CAPACITY, QueueHandle};
use super::messages::QueueCommand;
use super::state::{Admission, Effect, QueueConfig, QueueState};
use crate::domain::ItemView;
use crate::publish::Publisher;

pub struct QueueActor {
    state: QueueState,
    mailbox: mpsc::Receiver<QueueCommand>,
    snapshot: watch::Sender<Arc<Vec<ItemView>>>,
    events: broadcast::Sender<QueueEvent>,
    admissions: mpsc::UnboundedSender<Admission>,
    publisher: Option<Arc<Publisher>>,
    cancellation_token: CancellationToken,
}

impl QueueActor {
    /// Create the actor, its handle, and the receiver the pipeline consumes
    /// admissions from.
    pub fn new(
        config: QueueConfig,
        publisher: Option<Arc<Publisher>>,
        cancellation_token: CancellationToken,
    ) -> (Self, QueueHandle, mpsc::UnboundedReceiver<Admission>) {
        let (sender, mailbox) = mpsc::channel(DEFAULT_MAILBOX_CAPACITY);
        let (snapshot, snapshot_rx) = watch::channel(Arc::new(Vec::new()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (admissions, admissions_rx) = mpsc::unbounded_channel();

        let handle = QueueHandle::new(
            sender,
            snapshot_rx,
            events.clone(),
            cancellation_token.clone(),
        );
        let actor = Self {
            state: QueueState::new(config),
            mailbox,
            snapshot,
            events,
            admissions,
            publisher,
            cancellation_token,
        };
        (actor, handle, admissions_rx)
    }

    /// Create the actor and spawn it on the current runtime.
    pub fn spawn(
        config: QueueConfig,
        publisher: Option<Arc<Publisher>>,
        cancellation_token: CancellationToken,
    ) -> (
        QueueHandle,
        mpsc::UnboundedReceiver<Admission>,
        JoinHandle<()>,
    ) {
        let (actor, handle, admissions) = Self::new(config, publisher, cancellation_token);
        let task = tokio::spawn(actor.run());
        (handle, admissions, task)
    }

    pub async fn run(mut self) {
        let config = self.state.config();
        info!(
            max_queued = config.max_queued,
            max_queued_per_user = config.max_queued_per_user,
            "Queue actor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.cancellation_token.cancelled() => {
                    debug!("Queue actor cancelled");
                    break;
                }

                msg = self.mailbox.recv() => match msg {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All queue handles dropped");
                        break;
                    }
                },
            }
        }

        info!(remaining = self.state.len(), "Queue actor stopped");
    }

    fn handle_command(&mut self, command: QueueCommand) {
        let name = command.name();
        match command {
            QueueCommand::Enqueue {
                requester,
                url,
                pitch_shift,
                reply,
            } => {
                let result = self.state.enqueue(&requester, &url, pitch_shift);
                match &result {
                    Ok(view) => info!(
                        item_id = %view.id,
                        requester = %requester.id,
                        url = %url,
                        pitch_shift,
                        "Item admitted"
                    ),
                    Err(e) => debug!(requester = %requester.id, url = %url, "Enqueue rejected: {}", e),
                }
                self.publish_changes();
                let _ = reply.send(result);
            }
            QueueCommand::Advance {
                id,
                from,
                to,
                payload,
                reply,
            } => {
                let result = self.state.advance(id, from, to, payload);
                if result.is_ok() {
                    debug!(item_id = %id, %from, %to, "Item advanced");
                }
                self.publish_changes();
                let _ = reply.send(result);
            }
            QueueCommand::Remove {
                id,
                requester,
                reply,
            } => {
                let result = self.state.remove(id, &requester);
                if result.is_ok() {
                    info!(item_id = %id, requester = %requester.id, "Item removed");
                }
                self.publish_changes();
                let _ = reply.send(result);
            }
            QueueCommand::Skip { reply } => {
                let outcome = self.state.skip();
                debug!(
                    finished = ?outcome.finished.as_ref().map(|v| v.id),
                    now_playing = ?outcome.now_playing.as_ref().map(|v| v.id),
                    waiting = outcome.waiting,
                    "Skip handled"
                );
                self.publish_changes();
                let _ = reply.send(outcome);
            }
            QueueCommand::Reorder {
                id,
                position,
                requester,
                reply,
            } => {
                let result = self.state.reorder(id, position, &requester);
                self.publish_changes();
                let _ = reply.send(result);
            }
            QueueCommand::Reset { requester, reply } => {
                let result = self.state.reset(&requester);
                if let Ok(count) = &result {
                    info!(count, requester = %requester.id, "Queue reset");
                }
                self.publish_changes();
                let _ = reply.send(result);
            }
            QueueCommand::Status { id, reply } => {
                let _ = reply.send(self.state.status(id));
            }
        }
        debug!(command = name, len = self.state.len(), "Queue command handled");
    }

    /// Execute recorded effects and publish a fresh snapshot. Runs before the
    /// reply is sent, so a caller never observes an outdated snapshot.
    fn publish_changes(&mut self) {
        for effect in self.state.take_effects() {
            match effect {
                Effect::Notify(event) => {
                    // No subscribers is fine.
                    let _ = self.events.send(event);
                }
                Effect::Admit(admission) => {
                    let id = admission.id;
                    if self.admissions.send(admission).is_err() {
                        warn!(item_id = %id, "Pipeline is not accepting admissions");
                    }
                }
                Effect::Cleanup(id) => {
                    if let Some(publisher) = &self.publisher {
                        let publisher = Arc::clone(publisher);
                        tokio::spawn(async move { publisher.cleanup(id).await });
                    }
                }
            }
        }
        self.snapshot.send_replace(Arc::new(self.state.views()));
    }
}
