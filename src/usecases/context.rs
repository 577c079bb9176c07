use std::{fmt, sync::Arc, time::Duration};

use tracing_appender::non_blocking::WorkerGuard;

use crate::{
    domain::message::Actor,
    infra::config::AppConfig,
    usecases::{
        chat_sync::{ChatSync, SyncSettings},
        contracts::{LiveFeed, MessageStore, PatientDirectory},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Supabase,
    Offline,
}

impl StoreMode {
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Supabase => "supabase",
            Self::Offline => "offline",
        }
    }
}

pub struct AppContext {
    pub config: AppConfig,
    pub actor: Actor,
    pub mode: StoreMode,
    pub store: Arc<dyn MessageStore>,
    pub feed: Arc<dyn LiveFeed>,
    pub patients: Arc<dyn PatientDirectory>,
    pub(crate) log_guard: Option<WorkerGuard>,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        mode: StoreMode,
        store: Arc<dyn MessageStore>,
        feed: Arc<dyn LiveFeed>,
        patients: Arc<dyn PatientDirectory>,
    ) -> Self {
        let actor = Actor::new(config.actor.id.clone(), config.actor.role);
        Self {
            config,
            actor,
            mode,
            store,
            feed,
            patients,
            log_guard: None,
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            resubscribe_backoff: Duration::from_millis(self.config.sync.resubscribe_backoff_ms),
            max_resubscribe_attempts: self.config.sync.max_resubscribe_attempts,
        }
    }

    pub fn chat_sync(&self) -> ChatSync {
        ChatSync::new(
            Arc::clone(&self.store),
            Arc::clone(&self.feed),
            self.actor.clone(),
            self.sync_settings(),
        )
    }
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .field("actor", &self.actor)
            .field("mode", &self.mode)
            .field("file_logging", &self.log_guard.is_some())
            .finish_non_exhaustive()
    }
}
