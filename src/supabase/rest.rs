use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION},
    Response, StatusCode,
};
use serde_json::json;

use crate::{
    domain::{
        message::{ConversationKey, Message, MessageId, NewMessage},
        patient::Patient,
    },
    infra::config::SupabaseConfig,
    usecases::contracts::{MessageStore, PatientDirectory, StoreError},
};

use super::{
    project_base,
    row::{InsertRow, MessageRow, PatientRow},
    SupabaseSetupError, MESSAGES_TABLE, PATIENTS_TABLE,
};

const REST_REQUEST_FAILED: &str = "SUPABASE_REST_REQUEST_FAILED";

/// [`MessageStore`] and [`PatientDirectory`] over the PostgREST endpoint of a Supabase project.
#[derive(Debug, Clone)]
pub struct PostgrestStore {
    client: reqwest::Client,
    table_url: String,
    patients_url: String,
    timeout: Duration,
}

impl PostgrestStore {
    pub fn new(config: &SupabaseConfig, timeout: Duration) -> Result<Self, SupabaseSetupError> {
        let base = project_base(&config.url)?;
        if config.anon_key.trim().is_empty() {
            return Err(SupabaseSetupError::MissingAnonKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            sensitive(&config.anon_key).ok_or(SupabaseSetupError::InvalidHeader {
                header: "apikey",
            })?,
        );
        headers.insert(
            AUTHORIZATION,
            sensitive(&format!("Bearer {}", config.bearer_token())).ok_or(
                SupabaseSetupError::InvalidHeader {
                    header: "authorization",
                },
            )?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(SupabaseSetupError::Client)?;

        Ok(Self {
            client,
            table_url: format!("{base}/rest/v1/{MESSAGES_TABLE}"),
            patients_url: format!("{base}/rest/v1/{PATIENTS_TABLE}"),
            timeout,
        })
    }

    pub fn table_url(&self) -> &str {
        &self.table_url
    }

    fn transport_error(&self, operation: &'static str, error: reqwest::Error) -> StoreError {
        let mapped = if error.is_timeout() {
            StoreError::Timeout {
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }
        } else {
            StoreError::Transport(error.without_url().to_string())
        };

        tracing::warn!(
            code = REST_REQUEST_FAILED,
            operation,
            error_code = mapped.code(),
            "postgrest request failed"
        );
        mapped
    }
}

fn sensitive(value: &str) -> Option<HeaderValue> {
    let mut header = HeaderValue::from_str(value).ok()?;
    header.set_sensitive(true);
    Some(header)
}

fn status_error(status: StatusCode) -> Option<StoreError> {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Some(StoreError::Unauthorized),
        status if !status.is_success() => Some(StoreError::Rejected {
            status: status.as_u16(),
        }),
        _ => None,
    }
}

fn check(operation: &'static str, response: Response) -> Result<Response, StoreError> {
    match status_error(response.status()) {
        Some(error) => {
            tracing::warn!(
                code = REST_REQUEST_FAILED,
                operation,
                status = response.status().as_u16(),
                "postgrest rejected request"
            );
            Err(error)
        }
        None => Ok(response),
    }
}

fn rows_into_messages(rows: Vec<MessageRow>) -> Result<Vec<Message>, StoreError> {
    rows.into_iter()
        .map(|row| {
            row.into_message()
                .map_err(|malformed| StoreError::InvalidData(malformed.reason))
        })
        .collect()
}

#[async_trait]
impl MessageStore for PostgrestStore {
    async fn fetch(&self, key: &ConversationKey) -> Result<Vec<Message>, StoreError> {
        let response = self
            .client
            .get(&self.table_url)
            .query(&[
                ("select", "*".to_owned()),
                ("patient_id", format!("eq.{key}")),
                ("order", "created_at.asc,id.asc".to_owned()),
            ])
            .send()
            .await
            .map_err(|error| self.transport_error("fetch", error))?;

        let rows: Vec<MessageRow> = check("fetch", response)?
            .json()
            .await
            .map_err(|error| StoreError::InvalidData(error.without_url().to_string()))?;

        rows_into_messages(rows)
    }

    async fn insert(&self, message: NewMessage) -> Result<Message, StoreError> {
        let response = self
            .client
            .post(&self.table_url)
            .header("Prefer", "return=representation")
            .json(&InsertRow::from(&message))
            .send()
            .await
            .map_err(|error| self.transport_error("insert", error))?;

        let rows: Vec<MessageRow> = check("insert", response)?
            .json()
            .await
            .map_err(|error| StoreError::InvalidData(error.without_url().to_string()))?;

        rows_into_messages(rows)?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::InvalidData("insert returned no row".to_owned()))
    }

    async fn mark_read(&self, id: &MessageId) -> Result<(), StoreError> {
        let response = self
            .client
            .patch(&self.table_url)
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=minimal")
            .json(&json!({ "is_read": true }))
            .send()
            .await
            .map_err(|error| self.transport_error("mark_read", error))?;

        check("mark_read", response)?;
        Ok(())
    }
}

#[async_trait]
impl PatientDirectory for PostgrestStore {
    async fn list(&self, limit: usize) -> Result<Vec<Patient>, StoreError> {
        let response = self
            .client
            .get(&self.patients_url)
            .query(&[
                ("select", "*".to_owned()),
                ("order", "created_at.desc".to_owned()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .map_err(|error| self.transport_error("list_patients", error))?;

        let rows: Vec<PatientRow> = check("list_patients", response)?
            .json()
            .await
            .map_err(|error| StoreError::InvalidData(error.without_url().to_string()))?;

        rows.into_iter().map(PatientRow::into_patient).collect()
    }
}
