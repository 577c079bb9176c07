use futures_util::future::join_all;

use crate::domain::message::{Actor, Message, MessageId};

use super::contracts::{MessageStore, StoreError};

const MARK_READ_FAILED: &str = "SYNC_MARK_READ_FAILED";

/// Outcome of one read-state batch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReconcileReport {
    pub marked: Vec<MessageId>,
    /// Left unread in the store; the next fetch of the conversation picks them up again.
    pub failed: Vec<(MessageId, StoreError)>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Ids of unread messages written by the counterparty of `actor`.
pub fn pending_read_ids(actor: &Actor, messages: &[Message]) -> Vec<MessageId> {
    let (unread, _read): (Vec<&Message>, Vec<&Message>) =
        messages.iter().partition(|message| !message.is_read);

    unread
        .into_iter()
        .filter(|message| message.is_unread_for(actor))
        .map(|message| message.id.clone())
        .collect()
}

/// Issues every mark-read concurrently and waits for the whole batch.
///
/// A single failure never fails the batch.
pub async fn mark_read_batch(store: &dyn MessageStore, ids: Vec<MessageId>) -> ReconcileReport {
    let results = join_all(ids.iter().map(|id| store.mark_read(id))).await;

    let mut report = ReconcileReport::default();
    for (id, result) in ids.into_iter().zip(results) {
        match result {
            Ok(()) => report.marked.push(id),
            Err(error) => {
                tracing::warn!(
                    code = MARK_READ_FAILED,
                    message_id = %id,
                    error = %error,
                    "mark-read failed; will retry on next fetch"
                );
                report.failed.push((id, error));
            }
        }
    }

    report
}

pub async fn reconcile_read_state(
    store: &dyn MessageStore,
    actor: &Actor,
    messages: &[Message],
) -> ReconcileReport {
    mark_read_batch(store, pending_read_ids(actor, messages)).await
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::domain::message::{ConversationKey, NewMessage, SenderRole};

    #[derive(Default)]
    struct RecordingStore {
        failing_ids: Vec<&'static str>,
        calls: Mutex<Vec<MessageId>>,
    }

    #[async_trait]
    impl MessageStore for RecordingStore {
        async fn fetch(&self, _key: &ConversationKey) -> Result<Vec<Message>, StoreError> {
            unreachable!("reconciler never fetches")
        }

        async fn insert(&self, _message: NewMessage) -> Result<Message, StoreError> {
            unreachable!("reconciler never inserts")
        }

        async fn mark_read(&self, id: &MessageId) -> Result<(), StoreError> {
            self.calls.lock().expect("calls lock").push(id.clone());
            if self.failing_ids.contains(&id.as_str()) {
                return Err(StoreError::Transport("timeout".to_owned()));
            }
            Ok(())
        }
    }

    fn message(id: &str, role: SenderRole, is_read: bool) -> Message {
        Message {
            id: MessageId::new(id),
            conversation: ConversationKey::new("p1"),
            sender_id: "someone".to_owned(),
            sender_role: role,
            content: "text".to_owned(),
            is_read,
            created_at: Utc.timestamp_opt(10, 0).single().expect("valid ts"),
        }
    }

    fn doctor() -> Actor {
        Actor::new("doc-1", SenderRole::Doctor)
    }

    #[test]
    fn pending_ids_skip_read_and_own_messages() {
        let messages = vec![
            message("1", SenderRole::Patient, false),
            message("2", SenderRole::Patient, true),
            message("3", SenderRole::Doctor, false),
            message("4", SenderRole::Patient, false),
        ];

        let ids = pending_read_ids(&doctor(), &messages);

        assert_eq!(ids, vec![MessageId::new("1"), MessageId::new("4")]);
    }

    #[test]
    fn patient_actor_reads_doctor_messages() {
        let patient = Actor::new("p1", SenderRole::Patient);
        let messages = vec![
            message("1", SenderRole::Patient, false),
            message("2", SenderRole::Doctor, false),
        ];

        assert_eq!(
            pending_read_ids(&patient, &messages),
            vec![MessageId::new("2")]
        );
    }

    #[tokio::test]
    async fn marks_every_unread_counterparty_message() {
        let store = RecordingStore::default();
        let messages = vec![message("1", SenderRole::Patient, false)];

        let report = reconcile_read_state(&store, &doctor(), &messages).await;

        assert_eq!(report.marked, vec![MessageId::new("1")]);
        assert!(report.is_clean());
        assert_eq!(
            *store.calls.lock().expect("calls lock"),
            vec![MessageId::new("1")]
        );
    }

    #[tokio::test]
    async fn individual_failure_does_not_fail_batch() {
        let store = RecordingStore {
            failing_ids: vec!["2"],
            ..RecordingStore::default()
        };
        let messages = vec![
            message("1", SenderRole::Patient, false),
            message("2", SenderRole::Patient, false),
            message("3", SenderRole::Patient, false),
        ];

        let report = reconcile_read_state(&store, &doctor(), &messages).await;

        assert_eq!(report.marked, vec![MessageId::new("1"), MessageId::new("3")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, MessageId::new("2"));
        assert_eq!(store.calls.lock().expect("calls lock").len(), 3);
    }

    #[tokio::test]
    async fn nothing_to_do_issues_no_calls() {
        let store = RecordingStore::default();
        let messages = vec![message("1", SenderRole::Doctor, false)];

        let report = reconcile_read_state(&store, &doctor(), &messages).await;

        assert_eq!(report, ReconcileReport::default());
        assert!(store.calls.lock().expect("calls lock").is_empty());
    }
}
