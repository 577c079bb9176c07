//! Use case layer: conversation workflows and their orchestration.

pub mod bootstrap;
pub mod chat_sync;
pub mod context;
pub mod contracts;
pub mod list_patients;
pub mod live_subscriber;
pub mod load_messages;
pub mod reconcile_read;
pub mod send_message;
