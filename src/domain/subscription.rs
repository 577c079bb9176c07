/// Lifecycle of one live-event registration.
///
/// `TornDown` is terminal: reopening a conversation builds a new subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionState {
    #[default]
    Idle,
    Subscribing,
    Active,
    TornDown,
}

impl SubscriptionState {
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Idle => "SUBSCRIPTION_IDLE",
            Self::Subscribing => "SUBSCRIPTION_SUBSCRIBING",
            Self::Active => "SUBSCRIPTION_ACTIVE",
            Self::TornDown => "SUBSCRIPTION_TORN_DOWN",
        }
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Subscribing)
                | (Self::Subscribing, Self::Active)
                // registration failed: fetch-only mode, may be retried
                | (Self::Subscribing, Self::Idle)
                | (Self::Idle, Self::TornDown)
                | (Self::Subscribing, Self::TornDown)
                | (Self::Active, Self::TornDown)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: SubscriptionState,
    pub to: SubscriptionState,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid subscription transition {} -> {}",
            self.from.as_label(),
            self.to.as_label()
        )
    }
}

impl std::error::Error for InvalidTransition {}

#[cfg(test)]
mod tests {
    use super::SubscriptionState::*;

    #[test]
    fn happy_path_transitions_are_allowed() {
        assert!(Idle.can_transition_to(Subscribing));
        assert!(Subscribing.can_transition_to(Active));
        assert!(Active.can_transition_to(TornDown));
    }

    #[test]
    fn torn_down_is_terminal() {
        for next in [Idle, Subscribing, Active, TornDown] {
            assert!(!TornDown.can_transition_to(next));
        }
    }

    #[test]
    fn active_cannot_skip_back_to_subscribing() {
        assert!(!Active.can_transition_to(Subscribing));
        assert!(!Active.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(Active));
    }

    #[test]
    fn invalid_transition_names_both_states() {
        let error = super::InvalidTransition {
            from: TornDown,
            to: Active,
        };

        assert_eq!(
            error.to_string(),
            format!(
                "invalid subscription transition {} -> {}",
                TornDown.as_label(),
                Active.as_label()
            )
        );
    }
}
