use tokio::sync::mpsc::error::TryRecvError;

use crate::domain::{
    message::ConversationKey,
    subscription::{InvalidTransition, SubscriptionState},
};

use super::contracts::{LiveEvent, LiveSubscription};

const SUBSCRIPTION_REJECTED: &str = "SYNC_SUBSCRIPTION_REJECTED";
const SUBSCRIPTION_RELEASED: &str = "SYNC_SUBSCRIPTION_RELEASED";

/// What the subscriber observed while waiting on its feed.
#[derive(Debug)]
pub enum SubscriberEvent {
    Event(LiveEvent),
    /// The feed closed on its own; the subscriber is now torn down.
    Lost,
}

/// Owns at most one live registration for one conversation.
#[derive(Debug, Default)]
pub struct LiveSubscriber {
    state: SubscriptionState,
    key: Option<ConversationKey>,
    subscription: Option<LiveSubscription>,
}

impl LiveSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn key(&self) -> Option<&ConversationKey> {
        self.key.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.state == SubscriptionState::Active
    }

    /// `Idle -> Subscribing`: interest registered for `key`, waiting on acknowledgment.
    pub fn begin(&mut self, key: ConversationKey) -> Result<(), InvalidTransition> {
        self.transition(SubscriptionState::Subscribing)?;
        self.key = Some(key);
        Ok(())
    }

    /// `Subscribing -> Active`. Returns false and releases the handle when it
    /// does not belong here (wrong state or another conversation).
    pub fn activate(&mut self, subscription: LiveSubscription) -> bool {
        let matches_key = self.key.as_ref() == Some(subscription.key());
        if !matches_key || self.transition(SubscriptionState::Active).is_err() {
            tracing::debug!(
                code = SUBSCRIPTION_REJECTED,
                state = self.state.as_label(),
                conversation = %subscription.key(),
                "released subscription that arrived for a stale registration"
            );
            return false;
        }

        self.subscription = Some(subscription);
        true
    }

    /// `Subscribing -> Idle`: registration failed, the conversation stays fetch-only.
    pub fn fail(&mut self) -> Result<(), InvalidTransition> {
        self.transition(SubscriptionState::Idle)
    }

    /// Releases the registration. Safe to call in any state.
    pub fn tear_down(&mut self) {
        if self.state == SubscriptionState::TornDown {
            return;
        }

        if let Some(subscription) = self.subscription.take() {
            tracing::debug!(
                code = SUBSCRIPTION_RELEASED,
                conversation = %subscription.key(),
                "live subscription released"
            );
        }
        self.state = SubscriptionState::TornDown;
    }

    /// Waits for the next live event. Never resolves while no feed is held.
    pub async fn next_event(&mut self) -> SubscriberEvent {
        let Some(subscription) = self.subscription.as_mut() else {
            return std::future::pending().await;
        };

        match subscription.next_event().await {
            Some(event) => SubscriberEvent::Event(event),
            None => {
                self.tear_down();
                SubscriberEvent::Lost
            }
        }
    }

    /// Non-blocking variant of [`Self::next_event`]; `None` when nothing is queued.
    pub fn try_next_event(&mut self) -> Option<SubscriberEvent> {
        let subscription = self.subscription.as_mut()?;

        match subscription.try_next_event() {
            Ok(event) => Some(SubscriberEvent::Event(event)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.tear_down();
                Some(SubscriberEvent::Lost)
            }
        }
    }

    fn transition(&mut self, next: SubscriptionState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

impl Drop for LiveSubscriber {
    fn drop(&mut self) {
        self.tear_down();
    }
}
