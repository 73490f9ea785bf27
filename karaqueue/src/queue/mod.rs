//! Queue Manager: the single writer of the queue sequence.
//!
//! The sequence lives inside [`QueueActor`]; everything else talks to it
//! through a cloneable [`QueueHandle`]. Reads go through a `watch` snapshot
//! and never wait on the writer.

mod actor;
mod events;
mod handle;
mod messages;
mod state;

pub use actor::QueueActor;
pub use events::{EVENT_CHANNEL_CAPACITY, QueueEvent};
pub use handle::{DEFAULT_MAILBOX_CAPACITY, QueueHandle};
pub use messages::QueueCommand;
pub use state::{Admission, QueueConfig, QueueState, SkipOutcome};
