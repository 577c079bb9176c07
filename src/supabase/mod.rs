//! Supabase adapters for the store contracts: PostgREST for rows, the
//! Phoenix realtime socket for insert events.

pub mod realtime;
pub mod rest;
pub mod row;

use thiserror::Error;

pub use realtime::{RealtimeFeed, RealtimeSettings};
pub use rest::PostgrestStore;

pub(crate) const MESSAGES_TABLE: &str = "messages";
pub(crate) const PATIENTS_TABLE: &str = "patients";

#[derive(Debug, Error)]
pub enum SupabaseSetupError {
    #[error("supabase.url is not set")]
    MissingUrl,
    #[error("supabase.anon_key is not set")]
    MissingAnonKey,
    #[error("supabase.url must be an http(s) URL, got {0:?}")]
    InvalidUrl(String),
    #[error("credential for header {header} is not a valid header value")]
    InvalidHeader { header: &'static str },
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Project URL without trailing slashes, validated to be http(s).
pub(crate) fn project_base(url: &str) -> Result<&str, SupabaseSetupError> {
    let base = url.trim().trim_end_matches('/');
    if base.is_empty() {
        return Err(SupabaseSetupError::MissingUrl);
    }

    let has_host = base
        .strip_prefix("https://")
        .or_else(|| base.strip_prefix("http://"))
        .is_some_and(|host| !host.is_empty());
    if !has_host {
        return Err(SupabaseSetupError::InvalidUrl(base.to_owned()));
    }

    Ok(base)
}
