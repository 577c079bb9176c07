use std::{cmp::Ordering, collections::HashSet};

use super::message::{Actor, ConversationKey, Message, MessageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationUiState {
    Empty,
    Loading,
    Ready,
    Error,
}

/// Result of merging one message into the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Appended,
    /// Landed before the current tail (arrived out of order).
    Inserted,
    Duplicate,
    /// Not merged: the history failed to load, the next successful fetch brings it in.
    Deferred,
}

impl MergeOutcome {
    pub fn changed(self) -> bool {
        matches!(self, Self::Appended | Self::Inserted)
    }
}

/// View model for the currently open conversation.
///
/// The timeline is always sorted by [`Message::timeline_cmp`] and holds each
/// message id at most once. Callers only read it; every mutation goes through
/// fetch results, confirmed sends, read reconciliation or live events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationState {
    key: Option<ConversationKey>,
    messages: Vec<Message>,
    ui_state: ConversationUiState,
    settled: bool,
    last_error: Option<String>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            key: None,
            messages: Vec::new(),
            ui_state: ConversationUiState::Empty,
            settled: false,
            last_error: None,
        }
    }
}

impl ConversationState {
    pub fn key(&self) -> Option<&ConversationKey> {
        self.key.as_ref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn ui_state(&self) -> ConversationUiState {
        self.ui_state
    }

    pub fn is_open(&self) -> bool {
        self.key.is_some()
    }

    /// Whether the read-state batch for the latest fetch has completed.
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_current(&self, key: &ConversationKey) -> bool {
        self.key.as_ref() == Some(key)
    }

    pub fn unread_count(&self, actor: &Actor) -> usize {
        self.messages
            .iter()
            .filter(|message| message.is_unread_for(actor))
            .count()
    }

    pub fn set_loading(&mut self, key: ConversationKey) {
        self.key = Some(key);
        self.messages.clear();
        self.ui_state = ConversationUiState::Loading;
        self.settled = false;
        self.last_error = None;
    }

    /// Re-enters `Loading` for a retry without discarding what is already shown.
    pub fn begin_retry(&mut self) {
        if self.key.is_some() {
            self.ui_state = ConversationUiState::Loading;
            self.last_error = None;
        }
    }

    /// Merges a fetch result into the timeline.
    ///
    /// Fetched rows win over local copies with the same id (they carry the
    /// latest read flag). Local messages missing from the fetch are kept, so a
    /// fetch that raced a live event never drops the newer message.
    pub fn apply_fetch(&mut self, fetched: Vec<Message>) {
        let mut seen = HashSet::with_capacity(fetched.len());
        let mut merged: Vec<Message> = fetched
            .into_iter()
            .filter(|message| seen.insert(message.id.clone()))
            .collect();

        merged.extend(
            self.messages
                .drain(..)
                .filter(|message| !seen.contains(&message.id)),
        );
        merged.sort_by(Message::timeline_cmp);

        self.messages = merged;
        self.ui_state = ConversationUiState::Ready;
        self.settled = false;
        self.last_error = None;
    }

    /// Merges a single message (live event or confirmed send) in timeline order.
    pub fn apply_message(&mut self, message: Message) -> MergeOutcome {
        if self.ui_state == ConversationUiState::Error {
            return MergeOutcome::Deferred;
        }
        if self.contains(&message.id) {
            return MergeOutcome::Duplicate;
        }

        let position = self
            .messages
            .partition_point(|held| held.timeline_cmp(&message) != Ordering::Greater);
        let outcome = if position == self.messages.len() {
            MergeOutcome::Appended
        } else {
            MergeOutcome::Inserted
        };

        self.messages.insert(position, message);
        outcome
    }

    /// Flips the read flag locally for messages the store confirmed as read.
    pub fn mark_read(&mut self, ids: &[MessageId]) -> usize {
        let mut changed = 0;
        for message in self.messages.iter_mut() {
            if !message.is_read && ids.contains(&message.id) {
                message.is_read = true;
                changed += 1;
            }
        }
        changed
    }

    pub fn set_settled(&mut self) {
        self.settled = true;
    }

    /// A failed load leaves nothing on screen; a retry starts from scratch.
    pub fn set_error(&mut self, details: impl Into<String>) {
        self.messages.clear();
        self.settled = false;
        self.ui_state = ConversationUiState::Error;
        self.last_error = Some(details.into());
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn contains(&self, id: &MessageId) -> bool {
        // Newest messages are the likeliest duplicates.
        self.messages.iter().rev().any(|held| &held.id == id)
    }
}
