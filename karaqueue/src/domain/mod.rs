//! Domain types shared by the queue, the pipeline and the session adapter.

mod item;
mod pitch;
mod requester;
mod retry_policy;

pub use item::{ItemId, ItemStatus, ItemView, PublishedMedia, QueueItem, TransitionPayload};
pub use pitch::PitchShift;
pub use requester::Requester;
pub use retry_policy::RetryPolicy;
