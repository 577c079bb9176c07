use thiserror::Error;

use crate::domain::message::{ConversationKey, Message};

use super::contracts::{MessageStore, StoreError};

const LOAD_MESSAGES_FOREIGN_ROWS: &str = "SYNC_FETCH_FOREIGN_ROWS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadMessagesQuery {
    pub conversation: ConversationKey,
}

impl LoadMessagesQuery {
    pub fn new(conversation: ConversationKey) -> Self {
        Self { conversation }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadMessagesOutput {
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadMessagesError {
    #[error("message store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
}

/// Fetches the full history of one conversation, oldest first.
///
/// Rows that belong to another conversation are dropped and the result is
/// re-sorted, so callers can rely on the ordering even if the store slips.
pub async fn load_messages(
    store: &dyn MessageStore,
    query: LoadMessagesQuery,
) -> Result<LoadMessagesOutput, LoadMessagesError> {
    let fetched = store
        .fetch(&query.conversation)
        .await
        .map_err(LoadMessagesError::StoreUnavailable)?;

    let total = fetched.len();
    let mut messages: Vec<Message> = fetched
        .into_iter()
        .filter(|message| message.conversation == query.conversation)
        .collect();

    if messages.len() != total {
        tracing::warn!(
            code = LOAD_MESSAGES_FOREIGN_ROWS,
            conversation = %query.conversation,
            dropped = total - messages.len(),
            "fetch returned rows from another conversation"
        );
    }

    messages.sort_by(Message::timeline_cmp);
    Ok(LoadMessagesOutput { messages })
}
