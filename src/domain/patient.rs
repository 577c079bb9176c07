use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use super::message::ConversationKey;

/// A patient as listed in the care-team directory.
///
/// The patient id is also the key of the patient's conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patient {
    pub id: ConversationKey,
    pub name: String,
    pub age: Option<u32>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl Patient {
    /// Directory order: most recently registered first, id as tiebreak.
    pub fn directory_cmp(&self, other: &Self) -> Ordering {
        other
            .created_at
            .cmp(&self.created_at)
            .then_with(|| self.id.as_str().cmp(other.id.as_str()))
    }
}
