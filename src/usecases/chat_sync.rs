//! Keeps the open conversation in sync with the remote store.
//!
//! All remote work runs in spawned tasks that post a [`Completion`] back to
//! this orchestrator. State is only touched when the owner pulls the next
//! update, so the view model has a single writer and needs no locking.
//! Each open bumps a generation counter; completions from an earlier
//! generation are discarded instead of applied.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::mpsc;

use crate::domain::{
    conversation_state::{ConversationState, ConversationUiState, MergeOutcome},
    message::{Actor, ConversationKey, Message, MessageId},
    subscription::SubscriptionState,
};

use super::{
    contracts::{LiveFeed, LiveSubscription, MessageStore, StoreError},
    live_subscriber::{LiveSubscriber, SubscriberEvent},
    load_messages::{load_messages, LoadMessagesError, LoadMessagesOutput, LoadMessagesQuery},
    reconcile_read::{mark_read_batch, pending_read_ids, ReconcileReport},
    send_message::{send_message, validate_content, SendMessageCommand, SendMessageError},
};

const SYNC_CONVERSATION_OPENED: &str = "SYNC_CONVERSATION_OPENED";
const SYNC_FETCH_FAILED: &str = "SYNC_FETCH_FAILED";
const SYNC_SEND_FAILED: &str = "SYNC_SEND_FAILED";
const SYNC_SUBSCRIBE_FAILED: &str = "SYNC_SUBSCRIBE_FAILED";
const SYNC_SUBSCRIPTION_LOST: &str = "SYNC_SUBSCRIPTION_LOST";
const SYNC_FETCH_ONLY: &str = "SYNC_FETCH_ONLY";
const SYNC_MALFORMED_EVENT: &str = "SYNC_MALFORMED_EVENT";
const SYNC_STALE_RESULT: &str = "SYNC_STALE_RESULT";

const MAX_BACKOFF_SHIFT: u32 = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// First resubscribe delay; doubled per attempt.
    pub resubscribe_backoff: Duration,
    /// Zero keeps a failed conversation fetch-only until the next open or retry.
    pub max_resubscribe_attempts: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            resubscribe_backoff: Duration::from_millis(1_000),
            max_resubscribe_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Result of an operation started for a conversation that is no longer current.
    StaleResult,
    MalformedEvent,
    ForeignConversation,
}

/// What changed after one step of the sync loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncUpdate {
    Loaded {
        conversation: ConversationKey,
        count: usize,
    },
    LoadFailed {
        conversation: ConversationKey,
        error: LoadMessagesError,
    },
    ReadSettled {
        conversation: ConversationKey,
        report: ReconcileReport,
    },
    Sent {
        message: Message,
        outcome: MergeOutcome,
    },
    /// The content is handed back so the input can be restored for a retry.
    SendFailed {
        conversation: ConversationKey,
        content: String,
        error: SendMessageError,
    },
    Received {
        message: Message,
        outcome: MergeOutcome,
    },
    SubscriptionActive {
        conversation: ConversationKey,
    },
    SubscriptionFailed {
        conversation: ConversationKey,
        error: StoreError,
        retry_in: Option<Duration>,
    },
    SubscriptionLost {
        conversation: ConversationKey,
        retry_in: Option<Duration>,
    },
    Resubscribing {
        conversation: ConversationKey,
    },
    Dropped {
        reason: DropReason,
    },
}

#[derive(Debug)]
enum Completion {
    Fetched {
        generation: u64,
        key: ConversationKey,
        catch_up: bool,
        result: Result<LoadMessagesOutput, LoadMessagesError>,
    },
    ReadSettled {
        generation: u64,
        key: ConversationKey,
        report: ReconcileReport,
    },
    Sent {
        key: ConversationKey,
        content: String,
        result: Result<Message, SendMessageError>,
    },
    Subscribed {
        generation: u64,
        key: ConversationKey,
        result: Result<LiveSubscription, StoreError>,
    },
    ResubscribeDue {
        generation: u64,
        key: ConversationKey,
    },
}

pub struct ChatSync {
    store: Arc<dyn MessageStore>,
    feed: Arc<dyn LiveFeed>,
    actor: Actor,
    settings: SyncSettings,
    state: ConversationState,
    subscriber: LiveSubscriber,
    generation: u64,
    resubscribe_attempts: u32,
    recovering: bool,
    in_flight: usize,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
}

impl ChatSync {
    pub fn new(
        store: Arc<dyn MessageStore>,
        feed: Arc<dyn LiveFeed>,
        actor: Actor,
        settings: SyncSettings,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            store,
            feed,
            actor,
            settings,
            state: ConversationState::default(),
            subscriber: LiveSubscriber::new(),
            generation: 0,
            resubscribe_attempts: 0,
            recovering: false,
            in_flight: 0,
            completions_tx,
            completions_rx,
        }
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        self.subscriber.state()
    }

    pub fn has_pending_work(&self) -> bool {
        self.in_flight > 0
    }

    /// Opens `key`, releasing whatever conversation was open before.
    ///
    /// The subscription is registered only once the initial fetch has been
    /// applied, so no live event can be merged ahead of the history.
    pub fn open(&mut self, key: ConversationKey) {
        self.release_subscription();
        self.generation += 1;
        self.resubscribe_attempts = 0;
        self.recovering = false;
        self.state.set_loading(key.clone());

        tracing::info!(
            code = SYNC_CONVERSATION_OPENED,
            conversation = %key,
            generation = self.generation,
            "conversation opened"
        );

        self.spawn_fetch(key, false);
    }

    /// Re-runs the fetch for the current conversation. Returns false when nothing is open.
    pub fn retry(&mut self) -> bool {
        let Some(key) = self.state.key().cloned() else {
            return false;
        };

        self.state.begin_retry();
        self.resubscribe_attempts = 0;
        self.spawn_fetch(key, false);
        true
    }

    /// Releases the subscription and forgets the conversation.
    pub fn close(&mut self) {
        self.release_subscription();
        self.generation += 1;
        self.state.clear();
    }

    /// Validates and submits a message. The message reaches the view model
    /// only after the store confirmed it.
    pub fn send(&mut self, content: &str) -> Result<(), SendMessageError> {
        let content = validate_content(content)?.to_owned();
        let Some(key) = self.state.key().cloned() else {
            return Err(SendMessageError::NoOpenConversation);
        };

        let store = Arc::clone(&self.store);
        let actor = self.actor.clone();
        self.spawn(async move {
            let command = SendMessageCommand {
                conversation: key.clone(),
                content: content.clone(),
            };
            let result = send_message(store.as_ref(), &actor, command).await;
            Completion::Sent {
                key,
                content,
                result,
            }
        });

        Ok(())
    }

    /// Waits for and applies the next completion or live event.
    pub async fn next_update(&mut self) -> SyncUpdate {
        tokio::select! {
            completion = self.completions_rx.recv() => match completion {
                Some(completion) => {
                    self.in_flight = self.in_flight.saturating_sub(1);
                    self.handle_completion(completion)
                }
                // the sender lives in `self`
                None => SyncUpdate::Dropped { reason: DropReason::StaleResult },
            },
            event = self.subscriber.next_event() => self.handle_live(event),
        }
    }

    /// Applies updates until no spawned work is outstanding and no live event is queued.
    pub async fn run_pending(&mut self) -> Vec<SyncUpdate> {
        let mut updates = Vec::new();
        loop {
            if let Some(event) = self.subscriber.try_next_event() {
                updates.push(self.handle_live(event));
                continue;
            }
            if self.in_flight == 0 {
                return updates;
            }
            updates.push(self.next_update().await);
        }
    }

    fn handle_completion(&mut self, completion: Completion) -> SyncUpdate {
        match completion {
            Completion::Fetched {
                generation,
                key,
                catch_up,
                result,
            } => {
                if generation != self.generation {
                    return stale(&key, "fetch");
                }
                self.apply_fetch(key, catch_up, result)
            }
            Completion::ReadSettled {
                generation,
                key,
                report,
            } => {
                if !self.state.is_current(&key) {
                    return stale(&key, "mark_read");
                }
                self.state.mark_read(&report.marked);
                if generation == self.generation {
                    self.state.set_settled();
                }
                SyncUpdate::ReadSettled {
                    conversation: key,
                    report,
                }
            }
            Completion::Sent {
                key,
                content,
                result,
            } => {
                if !self.state.is_current(&key) {
                    return stale(&key, "send");
                }
                match result {
                    Ok(message) => {
                        let outcome = self.state.apply_message(message.clone());
                        SyncUpdate::Sent { message, outcome }
                    }
                    Err(error) => {
                        tracing::warn!(
                            code = SYNC_SEND_FAILED,
                            conversation = %key,
                            error = %error,
                            "message send failed; input preserved"
                        );
                        SyncUpdate::SendFailed {
                            conversation: key,
                            content,
                            error,
                        }
                    }
                }
            }
            Completion::Subscribed {
                generation,
                key,
                result,
            } => {
                if generation != self.generation {
                    // dropping the handle here releases the late registration
                    return stale(&key, "subscribe");
                }
                self.apply_subscription(key, result)
            }
            Completion::ResubscribeDue { generation, key } => {
                // a failed load released the feed; the next successful fetch re-registers
                if generation != self.generation
                    || self.state.ui_state() == ConversationUiState::Error
                {
                    return stale(&key, "resubscribe");
                }
                self.ensure_subscription(key.clone());
                SyncUpdate::Resubscribing { conversation: key }
            }
        }
    }

    fn apply_fetch(
        &mut self,
        key: ConversationKey,
        catch_up: bool,
        result: Result<LoadMessagesOutput, LoadMessagesError>,
    ) -> SyncUpdate {
        match result {
            Ok(output) => {
                let count = output.messages.len();
                self.state.apply_fetch(output.messages);

                let pending = pending_read_ids(&self.actor, self.state.messages());
                if pending.is_empty() {
                    self.state.set_settled();
                } else {
                    self.spawn_reconcile(key.clone(), pending);
                }

                self.ensure_subscription(key.clone());

                SyncUpdate::Loaded {
                    conversation: key,
                    count,
                }
            }
            Err(error) => {
                tracing::warn!(
                    code = SYNC_FETCH_FAILED,
                    conversation = %key,
                    catch_up,
                    error = %error,
                    "conversation fetch failed"
                );
                // a failed catch-up keeps what is already on screen
                if !catch_up {
                    self.state.set_error(error.to_string());
                    self.release_subscription();
                    self.recovering = false;
                }
                SyncUpdate::LoadFailed {
                    conversation: key,
                    error,
                }
            }
        }
    }

    fn apply_subscription(
        &mut self,
        key: ConversationKey,
        result: Result<LiveSubscription, StoreError>,
    ) -> SyncUpdate {
        match result {
            Ok(subscription) => {
                if !self.subscriber.activate(subscription) {
                    return SyncUpdate::Dropped {
                        reason: DropReason::StaleResult,
                    };
                }
                self.resubscribe_attempts = 0;

                // events inserted while we were away only show up in a fetch
                if std::mem::take(&mut self.recovering) {
                    self.spawn_fetch(key.clone(), true);
                }

                SyncUpdate::SubscriptionActive { conversation: key }
            }
            Err(error) => {
                let _ = self.subscriber.fail();
                tracing::warn!(
                    code = SYNC_SUBSCRIBE_FAILED,
                    conversation = %key,
                    error = %error,
                    "live subscription failed; conversation is fetch-only"
                );
                let retry_in = self.schedule_resubscribe(key.clone());
                SyncUpdate::SubscriptionFailed {
                    conversation: key,
                    error,
                    retry_in,
                }
            }
        }
    }

    fn handle_live(&mut self, event: SubscriberEvent) -> SyncUpdate {
        match event {
            SubscriberEvent::Event(Ok(message)) => {
                if !self.state.is_current(&message.conversation) {
                    return SyncUpdate::Dropped {
                        reason: DropReason::ForeignConversation,
                    };
                }
                let outcome = self.state.apply_message(message.clone());
                SyncUpdate::Received { message, outcome }
            }
            SubscriberEvent::Event(Err(malformed)) => {
                tracing::warn!(
                    code = SYNC_MALFORMED_EVENT,
                    reason = %malformed.reason,
                    "dropped malformed live event"
                );
                SyncUpdate::Dropped {
                    reason: DropReason::MalformedEvent,
                }
            }
            SubscriberEvent::Lost => {
                let Some(key) = self.state.key().cloned() else {
                    return SyncUpdate::Dropped {
                        reason: DropReason::StaleResult,
                    };
                };
                tracing::warn!(
                    code = SYNC_SUBSCRIPTION_LOST,
                    conversation = %key,
                    "live feed closed unexpectedly"
                );
                self.recovering = true;
                let retry_in = self.schedule_resubscribe(key.clone());
                SyncUpdate::SubscriptionLost {
                    conversation: key,
                    retry_in,
                }
            }
        }
    }

    /// Starts a registration unless one is already pending or active.
    fn ensure_subscription(&mut self, key: ConversationKey) {
        match self.subscriber.state() {
            SubscriptionState::Subscribing | SubscriptionState::Active => return,
            SubscriptionState::TornDown => self.subscriber = LiveSubscriber::new(),
            SubscriptionState::Idle => {}
        }
        if self.subscriber.begin(key.clone()).is_err() {
            return;
        }

        let feed = Arc::clone(&self.feed);
        let generation = self.generation;
        self.spawn(async move {
            let result = feed.subscribe(&key).await;
            Completion::Subscribed {
                generation,
                key,
                result,
            }
        });
    }

    fn schedule_resubscribe(&mut self, key: ConversationKey) -> Option<Duration> {
        if self.resubscribe_attempts >= self.settings.max_resubscribe_attempts {
            tracing::warn!(
                code = SYNC_FETCH_ONLY,
                conversation = %key,
                attempts = self.resubscribe_attempts,
                "giving up on live updates until the conversation is reopened"
            );
            return None;
        }

        let shift = self.resubscribe_attempts.min(MAX_BACKOFF_SHIFT);
        let delay = self.settings.resubscribe_backoff.saturating_mul(1 << shift);
        self.resubscribe_attempts += 1;

        let generation = self.generation;
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            Completion::ResubscribeDue { generation, key }
        });

        Some(delay)
    }

    fn spawn_fetch(&mut self, key: ConversationKey, catch_up: bool) {
        let store = Arc::clone(&self.store);
        let generation = self.generation;
        self.spawn(async move {
            let result =
                load_messages(store.as_ref(), LoadMessagesQuery::new(key.clone())).await;
            Completion::Fetched {
                generation,
                key,
                catch_up,
                result,
            }
        });
    }

    fn spawn_reconcile(&mut self, key: ConversationKey, pending: Vec<MessageId>) {
        let store = Arc::clone(&self.store);
        let generation = self.generation;
        self.spawn(async move {
            let report = mark_read_batch(store.as_ref(), pending).await;
            Completion::ReadSettled {
                generation,
                key,
                report,
            }
        });
    }

    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let completions_tx = self.completions_tx.clone();
        self.in_flight += 1;
        tokio::spawn(async move {
            let _ = completions_tx.send(task.await);
        });
    }

    fn release_subscription(&mut self) {
        self.subscriber.tear_down();
        self.subscriber = LiveSubscriber::new();
    }
}

fn stale(key: &ConversationKey, operation: &'static str) -> SyncUpdate {
    tracing::debug!(
        code = SYNC_STALE_RESULT,
        conversation = %key,
        operation,
        "discarded result for a conversation that is no longer current"
    );
    SyncUpdate::Dropped {
        reason: DropReason::StaleResult,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        domain::{
            conversation_state::ConversationUiState,
            message::{NewMessage, SenderRole},
        },
        infra::memory_store::{FaultPlan, InMemoryMessageStore},
        usecases::contracts::MalformedEvent,
    };

    fn doctor() -> Actor {
        Actor::new("doc-1", SenderRole::Doctor)
    }

    fn fast_settings() -> SyncSettings {
        SyncSettings {
            resubscribe_backoff: Duration::from_millis(1),
            max_resubscribe_attempts: 3,
        }
    }

    fn sync_over(store: &InMemoryMessageStore, settings: SyncSettings) -> ChatSync {
        let shared = Arc::new(store.clone());
        ChatSync::new(shared.clone(), shared, doctor(), settings)
    }

    fn key(value: &str) -> ConversationKey {
        ConversationKey::new(value)
    }

    fn stored(id: &str, conversation: &str, secs: i64, is_read: bool) -> Message {
        Message {
            id: MessageId::new(id),
            conversation: key(conversation),
            sender_id: "patient-1".to_owned(),
            sender_role: SenderRole::Patient,
            content: format!("message {id}"),
            is_read,
            created_at: Utc.timestamp_opt(secs, 0).single().expect("valid ts"),
        }
    }

    async fn patient_writes(
        store: &InMemoryMessageStore,
        conversation: &str,
        content: &str,
    ) -> Message {
        store
            .insert(NewMessage {
                conversation: key(conversation),
                sender_id: "patient-1".to_owned(),
                sender_role: SenderRole::Patient,
                content: content.to_owned(),
            })
            .await
            .expect("patient insert")
    }

    fn with_content<'a>(sync: &'a ChatSync, content: &str) -> Vec<&'a Message> {
        sync.state()
            .messages()
            .iter()
            .filter(|message| message.content == content)
            .collect()
    }

    #[tokio::test]
    async fn open_applies_fetch_before_subscribing() {
        let store = InMemoryMessageStore::new()
            .with_messages(vec![stored("2", "p1", 20, true), stored("1", "p1", 10, true)]);
        let mut sync = sync_over(&store, fast_settings());

        sync.open(key("p1"));
        let first = sync.next_update().await;

        assert_eq!(
            first,
            SyncUpdate::Loaded {
                conversation: key("p1"),
                count: 2
            }
        );
        assert_eq!(sync.subscription_state(), SubscriptionState::Subscribing);

        sync.run_pending().await;

        let ids: Vec<_> = sync.state().messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(sync.state().ui_state(), ConversationUiState::Ready);
        assert_eq!(sync.subscription_state(), SubscriptionState::Active);
        assert_eq!(store.active_subscriptions(&key("p1")), 1);
    }

    #[tokio::test]
    async fn doctor_opening_conversation_marks_patient_messages_read() {
        let store = InMemoryMessageStore::new().with_messages(vec![stored("1", "P1", 10, false)]);
        let mut sync = sync_over(&store, fast_settings());

        sync.open(key("P1"));
        let updates = sync.run_pending().await;

        assert!(updates.iter().any(|update| matches!(
            update,
            SyncUpdate::ReadSettled { report, .. } if report.marked == vec![MessageId::new("1")]
        )));
        assert_eq!(store.calls().mark_read, 1);
        assert!(store.rows(&key("P1"))[0].is_read);
        assert!(sync.state().messages()[0].is_read);
        assert!(sync.state().is_settled());
    }

    #[tokio::test]
    async fn failed_mark_read_is_retried_on_next_fetch() {
        let store = InMemoryMessageStore::new().with_messages(vec![stored("1", "P1", 10, false)]);
        store.fail_next(FaultPlan {
            mark_read: 1,
            ..FaultPlan::default()
        });
        let mut sync = sync_over(&store, fast_settings());

        sync.open(key("P1"));
        sync.run_pending().await;
        assert!(!store.rows(&key("P1"))[0].is_read);
        assert!(sync.state().is_settled());

        sync.retry();
        sync.run_pending().await;

        assert_eq!(store.calls().mark_read, 2);
        assert!(store.rows(&key("P1"))[0].is_read);
    }

    #[tokio::test]
    async fn whitespace_message_is_rejected_without_store_call() {
        let store = InMemoryMessageStore::new();
        let mut sync = sync_over(&store, fast_settings());
        sync.open(key("P1"));
        sync.run_pending().await;

        let result = sync.send("  ");

        assert_eq!(result, Err(SendMessageError::EmptyMessage));
        assert!(!sync.has_pending_work());
        assert_eq!(store.calls().insert, 0);
    }

    #[tokio::test]
    async fn send_without_open_conversation_is_rejected() {
        let store = InMemoryMessageStore::new();
        let mut sync = sync_over(&store, fast_settings());

        assert_eq!(sync.send("hi"), Err(SendMessageError::NoOpenConversation));
    }

    #[tokio::test]
    async fn own_message_echoed_by_feed_is_not_duplicated() {
        let store = InMemoryMessageStore::new();
        let mut sync = sync_over(&store, fast_settings());
        sync.open(key("P1"));
        sync.run_pending().await;

        sync.send("  hello there ").expect("valid content");
        let updates = sync.run_pending().await;

        assert_eq!(with_content(&sync, "hello there").len(), 1);
        assert_eq!(sync.state().messages().len(), 1);
        assert!(updates
            .iter()
            .any(|update| matches!(update, SyncUpdate::Sent { .. })));
        assert!(updates.iter().any(|update| matches!(
            update,
            SyncUpdate::Received { outcome: MergeOutcome::Duplicate, .. }
                | SyncUpdate::Sent { outcome: MergeOutcome::Duplicate, .. }
        )));

        let fetched = store.fetch(&key("P1")).await.expect("fetch");
        assert_eq!(
            fetched.iter().filter(|m| m.content == "hello there").count(),
            1
        );
    }

    #[tokio::test]
    async fn failed_send_hands_content_back_and_leaves_view_untouched() {
        let store = InMemoryMessageStore::new();
        let mut sync = sync_over(&store, fast_settings());
        sync.open(key("P1"));
        sync.run_pending().await;
        store.fail_next(FaultPlan {
            insert: 1,
            ..FaultPlan::default()
        });

        sync.send("see you monday").expect("valid content");
        let updates = sync.run_pending().await;

        assert!(updates.iter().any(|update| matches!(
            update,
            SyncUpdate::SendFailed { content, error: SendMessageError::StoreUnavailable(_), .. }
                if content == "see you monday"
        )));
        assert!(sync.state().messages().is_empty());
    }

    #[tokio::test]
    async fn live_messages_from_patient_are_appended() {
        let store = InMemoryMessageStore::new().with_messages(vec![stored("1", "P1", 10, true)]);
        let mut sync = sync_over(&store, fast_settings());
        sync.open(key("P1"));
        sync.run_pending().await;

        let incoming = patient_writes(&store, "P1", "I feel better").await;
        let updates = sync.run_pending().await;

        assert_eq!(
            updates,
            vec![SyncUpdate::Received {
                message: incoming,
                outcome: MergeOutcome::Appended
            }]
        );
        assert_eq!(sync.state().messages().len(), 2);
    }

    #[tokio::test]
    async fn malformed_live_event_is_dropped() {
        let store = InMemoryMessageStore::new();
        let mut sync = sync_over(&store, fast_settings());
        sync.open(key("P1"));
        sync.run_pending().await;

        store.inject_event(&key("P1"), Err(MalformedEvent::new("missing field `id`")));
        let updates = sync.run_pending().await;

        assert_eq!(
            updates,
            vec![SyncUpdate::Dropped {
                reason: DropReason::MalformedEvent
            }]
        );
        assert!(sync.state().messages().is_empty());
    }

    #[tokio::test]
    async fn live_event_for_other_conversation_is_dropped() {
        let store = InMemoryMessageStore::new();
        let mut sync = sync_over(&store, fast_settings());
        sync.open(key("P1"));
        sync.run_pending().await;

        store.inject_event(&key("P1"), Ok(stored("9", "P2", 10, false)));
        let updates = sync.run_pending().await;

        assert_eq!(
            updates,
            vec![SyncUpdate::Dropped {
                reason: DropReason::ForeignConversation
            }]
        );
    }

    #[tokio::test]
    async fn fetch_failure_flags_error_and_retry_refetches() {
        let store = InMemoryMessageStore::new().with_messages(vec![stored("1", "P1", 10, true)]);
        store.fail_next(FaultPlan {
            fetch: 1,
            ..FaultPlan::default()
        });
        let mut sync = sync_over(&store, fast_settings());

        sync.open(key("P1"));
        let updates = sync.run_pending().await;

        assert!(matches!(updates.as_slice(), [SyncUpdate::LoadFailed { .. }]));
        assert_eq!(sync.state().ui_state(), ConversationUiState::Error);
        assert!(sync.state().messages().is_empty());
        assert!(sync.state().last_error().is_some());
        assert_eq!(store.calls().subscribe, 0);

        assert!(sync.retry());
        sync.run_pending().await;

        assert_eq!(store.calls().fetch, 2);
        assert_eq!(sync.state().ui_state(), ConversationUiState::Ready);
        assert_eq!(sync.state().messages().len(), 1);
        assert_eq!(sync.subscription_state(), SubscriptionState::Active);
    }

    #[tokio::test]
    async fn failed_retry_releases_live_feed_until_history_reloads() {
        let store = InMemoryMessageStore::new().with_messages(vec![stored("1", "P1", 10, true)]);
        let mut sync = sync_over(&store, fast_settings());
        sync.open(key("P1"));
        sync.run_pending().await;
        assert_eq!(sync.subscription_state(), SubscriptionState::Active);

        store.fail_next(FaultPlan {
            fetch: 1,
            ..FaultPlan::default()
        });
        sync.retry();
        sync.run_pending().await;

        assert_eq!(sync.state().ui_state(), ConversationUiState::Error);
        assert!(sync.state().messages().is_empty());
        assert_ne!(sync.subscription_state(), SubscriptionState::Active);
        assert_eq!(store.active_subscriptions(&key("P1")), 0);

        let missed = patient_writes(&store, "P1", "are you there?").await;
        let updates = sync.run_pending().await;
        assert!(updates.is_empty());
        assert!(sync.state().messages().is_empty());

        sync.send("calling you now").expect("valid content");
        let updates = sync.run_pending().await;
        assert!(updates.iter().any(|update| matches!(
            update,
            SyncUpdate::Sent { outcome: MergeOutcome::Deferred, .. }
        )));
        assert!(sync.state().messages().is_empty());

        assert!(sync.retry());
        sync.run_pending().await;

        assert_eq!(sync.state().ui_state(), ConversationUiState::Ready);
        assert_eq!(sync.state().messages().len(), 3);
        assert!(sync
            .state()
            .messages()
            .iter()
            .any(|message| message.id == missed.id));
        assert_eq!(sync.subscription_state(), SubscriptionState::Active);
        assert_eq!(store.active_subscriptions(&key("P1")), 1);
    }

    #[tokio::test]
    async fn switching_back_and_forth_keeps_one_subscription() {
        let store = InMemoryMessageStore::new();
        let mut sync = sync_over(&store, fast_settings());

        sync.open(key("A"));
        // fetch applied, subscribe for A is now in flight
        sync.next_update().await;
        sync.open(key("B"));
        sync.open(key("A"));
        let updates = sync.run_pending().await;

        assert!(updates.iter().any(|update| matches!(
            update,
            SyncUpdate::Dropped {
                reason: DropReason::StaleResult
            }
        )));
        assert_eq!(store.active_subscriptions(&key("A")), 1);
        assert_eq!(store.active_subscriptions(&key("B")), 0);

        sync.open(key("B"));
        sync.run_pending().await;
        sync.open(key("A"));
        sync.run_pending().await;

        assert_eq!(store.active_subscriptions(&key("A")), 1);
        assert_eq!(store.active_subscriptions(&key("B")), 0);
    }

    #[tokio::test]
    async fn send_result_for_previous_conversation_is_discarded() {
        let store = InMemoryMessageStore::new();
        let mut sync = sync_over(&store, fast_settings());
        sync.open(key("A"));
        sync.run_pending().await;

        sync.send("for A").expect("valid content");
        sync.open(key("B"));
        sync.run_pending().await;

        assert!(with_content(&sync, "for A").is_empty());
        assert_eq!(store.rows(&key("A")).len(), 1);
    }

    #[tokio::test]
    async fn subscription_failure_keeps_conversation_usable_and_retries() {
        let store = InMemoryMessageStore::new().with_messages(vec![stored("1", "P1", 10, true)]);
        store.fail_next(FaultPlan {
            subscribe: 1,
            ..FaultPlan::default()
        });
        let mut sync = sync_over(&store, fast_settings());

        sync.open(key("P1"));
        let updates = sync.run_pending().await;

        assert!(updates.iter().any(|update| matches!(
            update,
            SyncUpdate::SubscriptionFailed { retry_in: Some(_), .. }
        )));
        assert_eq!(sync.state().ui_state(), ConversationUiState::Ready);
        assert_eq!(sync.subscription_state(), SubscriptionState::Active);
        assert_eq!(store.calls().subscribe, 2);
    }

    #[tokio::test]
    async fn without_retry_budget_conversation_stays_fetch_only_until_retry() {
        let store = InMemoryMessageStore::new();
        store.fail_next(FaultPlan {
            subscribe: 1,
            ..FaultPlan::default()
        });
        let mut sync = sync_over(
            &store,
            SyncSettings {
                max_resubscribe_attempts: 0,
                ..fast_settings()
            },
        );

        sync.open(key("P1"));
        let updates = sync.run_pending().await;

        assert!(updates.iter().any(|update| matches!(
            update,
            SyncUpdate::SubscriptionFailed { retry_in: None, .. }
        )));
        assert_eq!(sync.subscription_state(), SubscriptionState::Idle);

        sync.send("still works").expect("valid content");
        sync.run_pending().await;
        assert_eq!(with_content(&sync, "still works").len(), 1);

        sync.retry();
        sync.run_pending().await;
        assert_eq!(sync.subscription_state(), SubscriptionState::Active);
    }

    #[tokio::test]
    async fn lost_feed_resubscribes_and_catches_up() {
        let store = InMemoryMessageStore::new();
        let mut sync = sync_over(&store, fast_settings());
        sync.open(key("P1"));
        sync.run_pending().await;

        store.disconnect_all();
        let missed = patient_writes(&store, "P1", "are you there?").await;
        let updates = sync.run_pending().await;

        assert!(updates
            .iter()
            .any(|update| matches!(update, SyncUpdate::SubscriptionLost { .. })));
        assert_eq!(sync.subscription_state(), SubscriptionState::Active);
        assert_eq!(store.active_subscriptions(&key("P1")), 1);
        assert!(sync
            .state()
            .messages()
            .iter()
            .any(|message| message.id == missed.id));
    }

    #[tokio::test]
    async fn close_releases_subscription_and_resets_view() {
        let store = InMemoryMessageStore::new();
        let mut sync = sync_over(&store, fast_settings());
        sync.open(key("P1"));
        sync.run_pending().await;

        sync.close();

        assert_eq!(store.active_subscriptions(&key("P1")), 0);
        assert_eq!(sync.state().ui_state(), ConversationUiState::Empty);
        assert!(!sync.retry());
    }

    #[tokio::test]
    async fn interleaved_sends_and_live_events_stay_sorted_and_unique() {
        let store = InMemoryMessageStore::new();
        let mut sync = sync_over(&store, fast_settings());
        sync.open(key("P1"));

        for round in 0..5 {
            sync.send(&format!("doctor {round}")).expect("valid content");
            patient_writes(&store, "P1", &format!("patient {round}")).await;
            if round % 2 == 0 {
                sync.retry();
            }
        }
        sync.run_pending().await;

        let messages = sync.state().messages();
        assert_eq!(messages.len(), 10);
        assert!(messages
            .windows(2)
            .all(|pair| pair[0].timeline_cmp(&pair[1]) == std::cmp::Ordering::Less));
    }
}
