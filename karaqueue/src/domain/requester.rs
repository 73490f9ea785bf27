//! Identity of whoever issues a queue command.

use serde::{Deserialize, Serialize};

/// A resolved caller identity.
///
/// Identity and privilege are resolved by the session layer; the queue only
/// compares ids and checks the flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub id: String,
    pub privileged: bool,
}

impl Requester {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            privileged: false,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            privileged: true,
        }
    }

    /// Whether this requester may act on an item owned by `owner`.
    pub fn may_manage(&self, owner: &str) -> bool {
        self.privileged || self.id == owner
    }
}
