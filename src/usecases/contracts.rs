use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::domain::{
    message::{ConversationKey, Message, MessageId, NewMessage},
    patient::Patient,
};

/// Source-level failures of the remote message store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store transport failed: {0}")]
    Transport(String),
    #[error("store rejected credentials")]
    Unauthorized,
    #[error("store rejected request with status {status}")]
    Rejected { status: u16 },
    #[error("store returned invalid data: {0}")]
    InvalidData(String),
    #[error("store did not respond within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "STORE_TRANSPORT",
            Self::Unauthorized => "STORE_UNAUTHORIZED",
            Self::Rejected { .. } => "STORE_REJECTED",
            Self::InvalidData(_) => "STORE_INVALID_DATA",
            Self::Timeout { .. } => "STORE_TIMEOUT",
        }
    }
}

/// A live payload that did not match the message row contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed live event: {reason}")]
pub struct MalformedEvent {
    pub reason: String,
}

impl MalformedEvent {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Every live event is validated at the store boundary before it reaches us.
pub type LiveEvent = Result<Message, MalformedEvent>;

/// Handle for one acknowledged live registration.
///
/// Dropping the handle releases the registration: the stop signal is sent to
/// the feed worker (if any) and the event channel closes.
#[derive(Debug)]
pub struct LiveSubscription {
    key: ConversationKey,
    events: mpsc::Receiver<LiveEvent>,
    stop_tx: Option<watch::Sender<bool>>,
}

impl LiveSubscription {
    pub fn new(key: ConversationKey, events: mpsc::Receiver<LiveEvent>) -> Self {
        Self {
            key,
            events,
            stop_tx: None,
        }
    }

    pub fn with_stop_signal(mut self, stop_tx: watch::Sender<bool>) -> Self {
        self.stop_tx = Some(stop_tx);
        self
    }

    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    /// Next live event, or `None` once the feed side has gone away.
    pub async fn next_event(&mut self) -> Option<LiveEvent> {
        self.events.recv().await
    }

    pub fn try_next_event(&mut self) -> Result<LiveEvent, mpsc::error::TryRecvError> {
        self.events.try_recv()
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        self.events.close();
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// All messages of the conversation, ascending by creation time.
    async fn fetch(&self, key: &ConversationKey) -> Result<Vec<Message>, StoreError>;

    /// Persists a message and returns the stored row (id and timestamp assigned).
    async fn insert(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Sets the read flag. Marking an already-read message is a no-op.
    async fn mark_read(&self, id: &MessageId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait LiveFeed: Send + Sync {
    /// Registers for insert events of one conversation; resolves on acknowledgment.
    async fn subscribe(&self, key: &ConversationKey) -> Result<LiveSubscription, StoreError>;
}

#[async_trait]
pub trait PatientDirectory: Send + Sync {
    /// Up to `limit` patients, most recently registered first.
    async fn list(&self, limit: usize) -> Result<Vec<Patient>, StoreError>;
}
