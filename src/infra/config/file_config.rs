use std::path::PathBuf;

use serde::Deserialize;

use crate::{
    domain::message::SenderRole,
    infra::config::{ActorConfig, AppConfig, LogConfig, SupabaseConfig, SyncConfig},
};

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub logging: Option<FileLogConfig>,
    pub supabase: Option<FileSupabaseConfig>,
    pub actor: Option<FileActorConfig>,
    pub sync: Option<FileSyncConfig>,
}

impl FileConfig {
    pub fn merge_into(self, config: &mut AppConfig) {
        if let Some(logging) = self.logging {
            logging.merge_into(&mut config.logging);
        }

        if let Some(supabase) = self.supabase {
            supabase.merge_into(&mut config.supabase);
        }

        if let Some(actor) = self.actor {
            actor.merge_into(&mut config.actor);
        }

        if let Some(sync) = self.sync {
            sync.merge_into(&mut config.sync);
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileLogConfig {
    pub level: Option<String>,
    pub directory: Option<PathBuf>,
}

impl FileLogConfig {
    fn merge_into(self, config: &mut LogConfig) {
        if let Some(level) = self.level {
            config.level = level;
        }

        if let Some(directory) = self.directory {
            config.directory = Some(directory);
        }
    }
}

#[derive(Deserialize, Default)]
pub struct FileSupabaseConfig {
    pub url: Option<String>,
    pub anon_key: Option<String>,
    pub access_token: Option<String>,
}

impl std::fmt::Debug for FileSupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSupabaseConfig")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl FileSupabaseConfig {
    fn merge_into(self, config: &mut SupabaseConfig) {
        if let Some(url) = self.url {
            config.url = url;
        }

        if let Some(anon_key) = self.anon_key {
            config.anon_key = anon_key;
        }

        if let Some(access_token) = self.access_token {
            config.access_token = Some(access_token);
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileActorConfig {
    pub id: Option<String>,
    pub role: Option<SenderRole>,
}

impl FileActorConfig {
    fn merge_into(self, config: &mut ActorConfig) {
        if let Some(id) = self.id {
            config.id = id;
        }

        if let Some(role) = self.role {
            config.role = role;
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileSyncConfig {
    pub request_timeout_ms: Option<u64>,
    pub subscribe_ack_timeout_ms: Option<u64>,
    pub heartbeat_interval_ms: Option<u64>,
    pub resubscribe_backoff_ms: Option<u64>,
    pub max_resubscribe_attempts: Option<u32>,
    pub event_buffer: Option<usize>,
}

impl FileSyncConfig {
    fn merge_into(self, config: &mut SyncConfig) {
        if let Some(timeout_ms) = self.request_timeout_ms {
            config.request_timeout_ms = timeout_ms;
        }

        if let Some(timeout_ms) = self.subscribe_ack_timeout_ms {
            config.subscribe_ack_timeout_ms = timeout_ms;
        }

        if let Some(interval_ms) = self.heartbeat_interval_ms {
            config.heartbeat_interval_ms = interval_ms;
        }

        if let Some(backoff_ms) = self.resubscribe_backoff_ms {
            config.resubscribe_backoff_ms = backoff_ms;
        }

        if let Some(attempts) = self.max_resubscribe_attempts {
            config.max_resubscribe_attempts = attempts;
        }

        if let Some(event_buffer) = self.event_buffer {
            config.event_buffer = event_buffer;
        }
    }
}
