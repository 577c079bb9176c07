use std::{path::Path, sync::Arc, time::Duration};

use crate::{
    infra::{
        self,
        config::{AppConfig, FileConfigAdapter},
        contracts::ConfigAdapter,
        error::AppError,
        memory_store::{InMemoryMessageStore, InMemoryPatientDirectory},
    },
    supabase::{PostgrestStore, RealtimeFeed, RealtimeSettings},
    usecases::context::{AppContext, StoreMode},
};

const STORE_SELECTED: &str = "BOOTSTRAP_STORE_SELECTED";

pub fn bootstrap(config_path: Option<&Path>, offline: bool) -> Result<AppContext, AppError> {
    let mut context = build_context(config_path, offline)?;
    context.log_guard = infra::logging::init(&context.config.logging)?;

    tracing::info!(
        code = STORE_SELECTED,
        mode = context.mode.as_label(),
        actor = %context.actor.id,
        "message store selected"
    );

    Ok(context)
}

fn build_context(config_path: Option<&Path>, offline: bool) -> Result<AppContext, AppError> {
    let config_adapter = FileConfigAdapter::new(config_path);
    let config = config_adapter
        .load()
        .map_err(|error| match error.downcast::<AppError>() {
            Ok(app_error) => app_error,
            Err(other) => AppError::InvalidConfig(other.to_string()),
        })?;
    validate(&config)?;

    if offline {
        return Ok(offline_context(config));
    }

    let store = Arc::new(PostgrestStore::new(
        &config.supabase,
        Duration::from_millis(config.sync.request_timeout_ms),
    )?);
    let feed = RealtimeFeed::new(&config.supabase, realtime_settings(&config))?;

    Ok(AppContext::new(
        config,
        StoreMode::Supabase,
        store.clone(),
        Arc::new(feed),
        store,
    ))
}

fn offline_context(config: AppConfig) -> AppContext {
    let store = Arc::new(InMemoryMessageStore::new().with_event_buffer(config.sync.event_buffer));
    AppContext::new(
        config,
        StoreMode::Offline,
        store.clone(),
        store,
        Arc::new(InMemoryPatientDirectory::new()),
    )
}

fn realtime_settings(config: &AppConfig) -> RealtimeSettings {
    RealtimeSettings {
        ack_timeout: Duration::from_millis(config.sync.subscribe_ack_timeout_ms),
        heartbeat_interval: Duration::from_millis(config.sync.heartbeat_interval_ms),
        event_buffer: config.sync.event_buffer,
    }
}

fn validate(config: &AppConfig) -> Result<(), AppError> {
    if config.actor.id.trim().is_empty() {
        return Err(AppError::InvalidConfig("actor.id must not be empty".to_owned()));
    }

    let sync = &config.sync;
    let zero_fields = [
        ("sync.request_timeout_ms", sync.request_timeout_ms == 0),
        ("sync.subscribe_ack_timeout_ms", sync.subscribe_ack_timeout_ms == 0),
        ("sync.heartbeat_interval_ms", sync.heartbeat_interval_ms == 0),
        ("sync.event_buffer", sync.event_buffer == 0),
    ];
    if let Some((name, _)) = zero_fields.iter().find(|(_, is_zero)| *is_zero) {
        return Err(AppError::InvalidConfig(format!("{name} must be greater than zero")));
    }

    Ok(())
}
