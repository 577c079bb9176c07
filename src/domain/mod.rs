//! Domain layer: messages, patients, the conversation view model and subscription states.

pub mod conversation_state;
pub mod message;
pub mod patient;
pub mod subscription;
