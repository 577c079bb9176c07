use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::mpsc;

use crate::{
    domain::{
        message::{ConversationKey, Message, MessageId, NewMessage},
        patient::Patient,
    },
    usecases::contracts::{
        LiveEvent, LiveFeed, LiveSubscription, MessageStore, PatientDirectory, StoreError,
    },
};

const DEFAULT_EVENT_BUFFER: usize = 64;
const LIVE_EVENT_DROPPED: &str = "MEMORY_STORE_LIVE_EVENT_DROPPED";

/// Number of calls each store operation has received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreCalls {
    pub fetch: usize,
    pub insert: usize,
    pub mark_read: usize,
    pub subscribe: usize,
}

/// How many upcoming calls of each operation should fail with a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaultPlan {
    pub fetch: u32,
    pub insert: u32,
    pub mark_read: u32,
    pub subscribe: u32,
}

#[derive(Debug)]
struct Registration {
    key: ConversationKey,
    tx: mpsc::Sender<LiveEvent>,
}

#[derive(Debug, Default)]
struct Inner {
    rows: Vec<Message>,
    registrations: Vec<Registration>,
    calls: StoreCalls,
    faults: FaultPlan,
    last_created_at: Option<DateTime<Utc>>,
}

/// Process-local message store with an insert feed.
///
/// Backs `--offline` runs and the sync tests. Timestamps are strictly
/// increasing so the ordering contract of the remote store holds here too.
#[derive(Debug, Clone)]
pub struct InMemoryMessageStore {
    inner: Arc<Mutex<Inner>>,
    event_buffer: usize,
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer.max(1);
        self
    }

    /// Seeds rows as if they had been stored earlier.
    #[cfg(test)]
    pub fn with_messages(self, messages: Vec<Message>) -> Self {
        {
            let mut inner = self.lock();
            for message in messages {
                inner.last_created_at = Some(match inner.last_created_at {
                    Some(prev) if prev > message.created_at => prev,
                    _ => message.created_at,
                });
                inner.rows.push(message);
            }
        }
        self
    }

    #[cfg(test)]
    pub fn fail_next(&self, plan: FaultPlan) {
        self.lock().faults = plan;
    }

    #[cfg(test)]
    pub fn calls(&self) -> StoreCalls {
        self.lock().calls
    }

    pub fn rows(&self, key: &ConversationKey) -> Vec<Message> {
        let mut rows: Vec<Message> = self
            .lock()
            .rows
            .iter()
            .filter(|message| &message.conversation == key)
            .cloned()
            .collect();
        rows.sort_by(Message::timeline_cmp);
        rows
    }

    /// Registrations for `key` whose receiving side is still alive.
    #[cfg(test)]
    pub fn active_subscriptions(&self, key: &ConversationKey) -> usize {
        self.lock()
            .registrations
            .iter()
            .filter(|registration| &registration.key == key && !registration.tx.is_closed())
            .count()
    }

    /// Delivers an arbitrary event to every live registration of `key`.
    #[cfg(test)]
    pub fn inject_event(&self, key: &ConversationKey, event: LiveEvent) {
        self.lock().publish(key, event);
    }

    /// Drops every registration, as if the realtime connection went away.
    #[cfg(test)]
    pub fn disconnect_all(&self) {
        self.lock().registrations.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_created_at {
            Some(prev) if now <= prev => prev + TimeDelta::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(stamp);
        stamp
    }

    fn publish(&mut self, key: &ConversationKey, event: LiveEvent) {
        self.registrations
            .retain(|registration| !registration.tx.is_closed());

        for registration in self
            .registrations
            .iter()
            .filter(|registration| &registration.key == key)
        {
            if let Err(error) = registration.tx.try_send(event.clone()) {
                tracing::warn!(
                    code = LIVE_EVENT_DROPPED,
                    conversation = %key,
                    error = %error,
                    "live event could not be delivered to subscriber"
                );
            }
        }
    }
}

fn take_fault(counter: &mut u32) -> bool {
    if *counter == 0 {
        return false;
    }
    *counter -= 1;
    true
}

fn injected(operation: &str) -> StoreError {
    StoreError::Transport(format!("injected {operation} failure"))
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn fetch(&self, key: &ConversationKey) -> Result<Vec<Message>, StoreError> {
        {
            let mut inner = self.lock();
            inner.calls.fetch += 1;
            if take_fault(&mut inner.faults.fetch) {
                return Err(injected("fetch"));
            }
        }
        Ok(self.rows(key))
    }

    async fn insert(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut inner = self.lock();
        inner.calls.insert += 1;
        if take_fault(&mut inner.faults.insert) {
            return Err(injected("insert"));
        }

        let stored = Message {
            id: MessageId::new(uuid::Uuid::new_v4().to_string()),
            conversation: message.conversation,
            sender_id: message.sender_id,
            sender_role: message.sender_role,
            content: message.content,
            is_read: false,
            created_at: inner.next_timestamp(),
        };
        inner.rows.push(stored.clone());
        inner.publish(&stored.conversation, Ok(stored.clone()));

        Ok(stored)
    }

    async fn mark_read(&self, id: &MessageId) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.calls.mark_read += 1;
        if take_fault(&mut inner.faults.mark_read) {
            return Err(injected("mark_read"));
        }

        if let Some(row) = inner.rows.iter_mut().find(|row| &row.id == id) {
            row.is_read = true;
        }
        Ok(())
    }
}

#[async_trait]
impl LiveFeed for InMemoryMessageStore {
    async fn subscribe(&self, key: &ConversationKey) -> Result<LiveSubscription, StoreError> {
        let mut inner = self.lock();
        inner.calls.subscribe += 1;
        if take_fault(&mut inner.faults.subscribe) {
            return Err(injected("subscribe"));
        }

        let (tx, rx) = mpsc::channel(self.event_buffer);
        inner.registrations.push(Registration {
            key: key.clone(),
            tx,
        });

        Ok(LiveSubscription::new(key.clone(), rx))
    }
}

/// Process-local patient directory for `--offline` runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPatientDirectory {
    patients: Arc<Mutex<Vec<Patient>>>,
}

impl InMemoryPatientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with_patients(self, patients: Vec<Patient>) -> Self {
        self.patients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(patients);
        self
    }
}

#[async_trait]
impl PatientDirectory for InMemoryPatientDirectory {
    async fn list(&self, limit: usize) -> Result<Vec<Patient>, StoreError> {
        let mut patients = self
            .patients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        patients.sort_by(Patient::directory_cmp);
        patients.truncate(limit);
        Ok(patients)
    }
}
