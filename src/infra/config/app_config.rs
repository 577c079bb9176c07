use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::message::SenderRole;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppConfig {
    pub logging: LogConfig,
    pub supabase: SupabaseConfig,
    pub actor: ActorConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
    /// When set, logs go to a daily rolling file here instead of stderr.
    pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            directory: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
    pub access_token: Option<String>,
}

impl SupabaseConfig {
    /// Token sent as bearer credentials: the user session when present, the anon key otherwise.
    pub fn bearer_token(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.anon_key)
    }
}

impl fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .field("anon_key", &redacted(&self.anon_key))
            .field(
                "access_token",
                &self.access_token.as_deref().map(redacted),
            )
            .finish()
    }
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() {
        "<unset>"
    } else {
        "[REDACTED]"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActorConfig {
    pub id: String,
    pub role: SenderRole,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            id: "care-team".to_owned(),
            role: SenderRole::Doctor,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    pub request_timeout_ms: u64,
    pub subscribe_ack_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub resubscribe_backoff_ms: u64,
    pub max_resubscribe_attempts: u32,
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            subscribe_ack_timeout_ms: 10_000,
            heartbeat_interval_ms: 25_000,
            resubscribe_backoff_ms: 1_000,
            max_resubscribe_attempts: 3,
            event_buffer: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_prefers_access_token_over_anon_key() {
        let mut supabase = SupabaseConfig {
            url: "https://example.supabase.co".to_owned(),
            anon_key: "anon".to_owned(),
            access_token: None,
        };
        assert_eq!(supabase.bearer_token(), "anon");

        supabase.access_token = Some("session".to_owned());
        assert_eq!(supabase.bearer_token(), "session");
    }

    #[test]
    fn debug_output_hides_credentials() {
        let supabase = SupabaseConfig {
            url: "https://example.supabase.co".to_owned(),
            anon_key: "eyJhbGciOiJIUzI1NiJ9.anon".to_owned(),
            access_token: Some("eyJhbGciOiJIUzI1NiJ9.user".to_owned()),
        };

        let rendered = format!("{supabase:?}");

        assert!(rendered.contains("example.supabase.co"));
        assert!(!rendered.contains("eyJhbGci"));
    }
}
