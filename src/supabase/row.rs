//! Wire shape of the `messages` and `patients` tables and their validation
//! into domain types.
//!
//! Both the REST responses and the realtime records go through
//! [`message_from_value`] / [`MessageRow::into_message`], so a row that does
//! not satisfy the contract never becomes a [`Message`].

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{
        message::{ConversationKey, Message, MessageId, NewMessage, SenderRole},
        patient::Patient,
    },
    usecases::contracts::{MalformedEvent, StoreError},
};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RowId {
    Text(String),
    Number(i64),
}

impl RowId {
    fn into_string(self) -> String {
        match self {
            Self::Text(value) => value,
            Self::Number(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageRow {
    pub id: RowId,
    pub patient_id: RowId,
    pub sender_id: String,
    pub sender_type: String,
    pub content: String,
    pub is_read: bool,
    pub created_at: String,
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message, MalformedEvent> {
        let id = self.id.into_string();
        if id.trim().is_empty() {
            return Err(MalformedEvent::new("empty id"));
        }

        let patient_id = self.patient_id.into_string();
        if patient_id.trim().is_empty() {
            return Err(MalformedEvent::new("empty patient_id"));
        }

        let sender_role = SenderRole::parse(&self.sender_type).ok_or_else(|| {
            MalformedEvent::new(format!("unknown sender_type {:?}", self.sender_type))
        })?;

        let created_at = parse_timestamp(&self.created_at).ok_or_else(|| {
            MalformedEvent::new(format!("unparseable created_at {:?}", self.created_at))
        })?;

        Ok(Message {
            id: MessageId::new(id),
            conversation: ConversationKey::new(patient_id),
            sender_id: self.sender_id,
            sender_role,
            content: self.content,
            is_read: self.is_read,
            created_at,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatientRow {
    pub id: RowId,
    pub name: String,
    #[serde(default)]
    pub age: Option<u32>,
    pub status: String,
    pub created_at: String,
}

impl PatientRow {
    pub fn into_patient(self) -> Result<Patient, StoreError> {
        let id = self.id.into_string();
        if id.trim().is_empty() {
            return Err(StoreError::InvalidData("patient row with empty id".to_owned()));
        }

        let created_at = parse_timestamp(&self.created_at).ok_or_else(|| {
            StoreError::InvalidData(format!(
                "patient {id} has unparseable created_at {:?}",
                self.created_at
            ))
        })?;

        Ok(Patient {
            id: ConversationKey::new(id),
            name: self.name,
            age: self.age,
            status: self.status,
            created_at,
        })
    }
}

/// Body of the insert request; the store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InsertRow<'a> {
    pub patient_id: &'a str,
    pub sender_id: &'a str,
    pub sender_type: &'a str,
    pub content: &'a str,
    pub is_read: bool,
}

impl<'a> From<&'a NewMessage> for InsertRow<'a> {
    fn from(message: &'a NewMessage) -> Self {
        Self {
            patient_id: message.conversation.as_str(),
            sender_id: &message.sender_id,
            sender_type: message.sender_role.as_str(),
            content: &message.content,
            is_read: false,
        }
    }
}

pub fn message_from_value(value: Value) -> Result<Message, MalformedEvent> {
    serde_json::from_value::<MessageRow>(value)
        .map_err(|error| MalformedEvent::new(error.to_string()))?
        .into_message()
}

/// Accepts RFC 3339 as well as the Postgres text form (`2024-05-01 10:00:00.123+00`).
/// Values without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    if let Ok(parsed) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}
