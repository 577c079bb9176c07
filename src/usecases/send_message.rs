//! Use case for sending a message to a patient conversation.
//!
//! Nothing is added to the view model here: the caller merges the returned
//! row only after the store confirmed persistence.

use thiserror::Error;

use crate::domain::message::{Actor, ConversationKey, Message, NewMessage};

use super::contracts::{MessageStore, StoreError};

/// Command to send a message to a specific conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessageCommand {
    pub conversation: ConversationKey,
    pub content: String,
}

/// Errors of the send message operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendMessageError {
    /// Content is empty after trimming whitespace. Raised before any remote call.
    #[error("message content is empty")]
    EmptyMessage,
    /// The store could not persist the message; the input should be kept for retry.
    #[error("message store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
    /// No conversation is open to send into.
    #[error("no conversation is open")]
    NoOpenConversation,
}

/// Trims and validates message content.
///
/// # Errors
/// Returns `SendMessageError::EmptyMessage` if nothing is left after trimming.
pub fn validate_content(content: &str) -> Result<&str, SendMessageError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(SendMessageError::EmptyMessage);
    }
    Ok(trimmed)
}

/// Persists a message authored by `actor` and returns the stored row.
///
/// # Errors
/// Returns `SendMessageError::EmptyMessage` if content is empty/whitespace.
/// Store failures map to `SendMessageError::StoreUnavailable`.
pub async fn send_message(
    store: &dyn MessageStore,
    actor: &Actor,
    command: SendMessageCommand,
) -> Result<Message, SendMessageError> {
    let content = validate_content(&command.content)?.to_owned();

    store
        .insert(NewMessage {
            conversation: command.conversation,
            sender_id: actor.id.clone(),
            sender_role: actor.role,
            content,
        })
        .await
        .map_err(SendMessageError::StoreUnavailable)
}
