//! Live insert feed over the Supabase realtime socket (Phoenix channels, vsn 1.0.0).
//!
//! One socket per subscription: `subscribe` connects, joins the
//! conversation's channel and resolves only once the join is acknowledged.
//! A spawned worker then forwards validated insert records, keeps the socket
//! alive with heartbeats, and leaves the channel when the
//! [`LiveSubscription`] is dropped.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    time::{Instant, MissedTickBehavior},
};
use tokio_tungstenite::{tungstenite::Message as Frame, MaybeTlsStream, WebSocketStream};

use crate::{
    domain::message::ConversationKey,
    infra::{config::SupabaseConfig, secrets::redact_url},
    usecases::contracts::{LiveEvent, LiveFeed, LiveSubscription, StoreError},
};

use super::{project_base, row::message_from_value, SupabaseSetupError, MESSAGES_TABLE};

const REALTIME_CONNECT_FAILED: &str = "SUPABASE_REALTIME_CONNECT_FAILED";
const REALTIME_JOIN_REJECTED: &str = "SUPABASE_REALTIME_JOIN_REJECTED";
const REALTIME_CHANNEL_STARTED: &str = "SUPABASE_REALTIME_CHANNEL_STARTED";
const REALTIME_CHANNEL_STOPPED: &str = "SUPABASE_REALTIME_CHANNEL_STOPPED";
const REALTIME_CHANNEL_CLOSED: &str = "SUPABASE_REALTIME_CHANNEL_CLOSED";
const REALTIME_READ_FAILED: &str = "SUPABASE_REALTIME_READ_FAILED";
const REALTIME_WRITE_FAILED: &str = "SUPABASE_REALTIME_WRITE_FAILED";

const PHOENIX_TOPIC: &str = "phoenix";
const JOIN_REF: &str = "1";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeSettings {
    pub ack_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub event_buffer: usize,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(25),
            event_buffer: 64,
        }
    }
}

/// [`LiveFeed`] backed by the realtime websocket of a Supabase project.
#[derive(Clone)]
pub struct RealtimeFeed {
    socket_url: String,
    access_token: String,
    settings: RealtimeSettings,
}

impl std::fmt::Debug for RealtimeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeFeed")
            .field("socket_url", &redact_url(&self.socket_url))
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RealtimeFeed {
    pub fn new(
        config: &SupabaseConfig,
        settings: RealtimeSettings,
    ) -> Result<Self, SupabaseSetupError> {
        if config.anon_key.trim().is_empty() {
            return Err(SupabaseSetupError::MissingAnonKey);
        }

        Ok(Self {
            socket_url: socket_url(&config.url, &config.anon_key)?,
            access_token: config.bearer_token().to_owned(),
            settings,
        })
    }

    async fn connect(&self) -> Result<Socket, StoreError> {
        let connect = tokio_tungstenite::connect_async(self.socket_url.as_str());
        match tokio::time::timeout(self.settings.ack_timeout, connect).await {
            Ok(Ok((socket, _response))) => Ok(socket),
            Ok(Err(error)) => {
                tracing::warn!(
                    code = REALTIME_CONNECT_FAILED,
                    url = %redact_url(&self.socket_url),
                    error = %error,
                    "realtime socket connect failed"
                );
                Err(StoreError::Transport(error.to_string()))
            }
            Err(_) => Err(self.ack_timeout_error()),
        }
    }

    fn ack_timeout_error(&self) -> StoreError {
        StoreError::Timeout {
            timeout_ms: u64::try_from(self.settings.ack_timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[async_trait]
impl LiveFeed for RealtimeFeed {
    async fn subscribe(&self, key: &ConversationKey) -> Result<LiveSubscription, StoreError> {
        let mut socket = self.connect().await?;
        let topic = channel_topic(key);

        let join = join_frame(&topic, key, &self.access_token);
        socket
            .send(Frame::Text(join.to_string().into()))
            .await
            .map_err(|error| StoreError::Transport(error.to_string()))?;

        match tokio::time::timeout(
            self.settings.ack_timeout,
            wait_for_join_reply(&mut socket, &topic),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                let _ = socket.close(None).await;
                return Err(error);
            }
            Err(_) => {
                let _ = socket.close(None).await;
                return Err(self.ack_timeout_error());
            }
        }

        let (event_tx, event_rx) = mpsc::channel(self.settings.event_buffer.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(run_channel(
            socket,
            topic,
            event_tx,
            stop_rx,
            self.settings.heartbeat_interval,
        ));

        tracing::info!(
            code = REALTIME_CHANNEL_STARTED,
            conversation = %key,
            "realtime channel joined"
        );

        Ok(LiveSubscription::new(key.clone(), event_rx).with_stop_signal(stop_tx))
    }
}

/// `https://ref.supabase.co` -> `wss://ref.supabase.co/realtime/v1/websocket?apikey=..&vsn=1.0.0`
pub fn socket_url(project_url: &str, anon_key: &str) -> Result<String, SupabaseSetupError> {
    let base = project_base(project_url)?;
    let host = base
        .strip_prefix("https://")
        .map(|host| format!("wss://{host}"))
        .or_else(|| base.strip_prefix("http://").map(|host| format!("ws://{host}")))
        .ok_or_else(|| SupabaseSetupError::InvalidUrl(base.to_owned()))?;

    Ok(format!(
        "{host}/realtime/v1/websocket?apikey={anon_key}&vsn=1.0.0"
    ))
}

pub fn channel_topic(key: &ConversationKey) -> String {
    format!("realtime:{MESSAGES_TABLE}:{key}")
}

fn join_frame(topic: &str, key: &ConversationKey, access_token: &str) -> Value {
    json!({
        "topic": topic,
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": "INSERT",
                    "schema": "public",
                    "table": MESSAGES_TABLE,
                    "filter": format!("patient_id=eq.{key}"),
                }],
            },
            "access_token": access_token,
        },
        "ref": JOIN_REF,
        "join_ref": JOIN_REF,
    })
}

fn heartbeat_frame(reference: u64) -> Value {
    json!({
        "topic": PHOENIX_TOPIC,
        "event": "heartbeat",
        "payload": {},
        "ref": reference.to_string(),
    })
}

fn leave_frame(topic: &str, reference: u64) -> Value {
    json!({
        "topic": topic,
        "event": "phx_leave",
        "payload": {},
        "ref": reference.to_string(),
        "join_ref": JOIN_REF,
    })
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

/// What one inbound frame means for our channel.
#[derive(Debug, PartialEq)]
enum Inbound {
    JoinAccepted,
    JoinRejected(String),
    Insert(Value),
    Closed(String),
    Ignored,
}

fn classify(raw: &str, topic: &str) -> Result<Inbound, serde_json::Error> {
    let frame: InboundFrame = serde_json::from_str(raw)?;
    if frame.topic != topic {
        return Ok(Inbound::Ignored);
    }

    let inbound = match frame.event.as_str() {
        "phx_reply" if frame.reference.as_deref() == Some(JOIN_REF) => {
            match frame.payload.get("status").and_then(Value::as_str) {
                Some("ok") => Inbound::JoinAccepted,
                other => Inbound::JoinRejected(
                    frame
                        .payload
                        .pointer("/response/reason")
                        .and_then(Value::as_str)
                        .or(other)
                        .unwrap_or("no status")
                        .to_owned(),
                ),
            }
        }
        "postgres_changes" => {
            let data = &frame.payload["data"];
            if data["type"].as_str() == Some("INSERT") {
                Inbound::Insert(data["record"].clone())
            } else {
                Inbound::Ignored
            }
        }
        "INSERT" => Inbound::Insert(frame.payload["record"].clone()),
        "phx_close" => Inbound::Closed("channel closed by server".to_owned()),
        "phx_error" => Inbound::Closed("channel crashed on server".to_owned()),
        "system" if frame.payload["status"].as_str() == Some("error") => Inbound::Closed(
            frame.payload["message"]
                .as_str()
                .unwrap_or("system error")
                .to_owned(),
        ),
        _ => Inbound::Ignored,
    };

    Ok(inbound)
}

async fn wait_for_join_reply(socket: &mut Socket, topic: &str) -> Result<(), StoreError> {
    while let Some(frame) = socket.next().await {
        let text = match frame {
            Ok(Frame::Text(text)) => text,
            Ok(Frame::Close(_)) => break,
            Ok(_) => continue,
            Err(error) => return Err(StoreError::Transport(error.to_string())),
        };

        match classify(&text, topic) {
            Ok(Inbound::JoinAccepted) => return Ok(()),
            Ok(Inbound::JoinRejected(reason)) => {
                tracing::warn!(
                    code = REALTIME_JOIN_REJECTED,
                    topic,
                    reason = %reason,
                    "realtime channel join rejected"
                );
                return Err(StoreError::Transport(format!("join rejected: {reason}")));
            }
            Ok(Inbound::Closed(reason)) => return Err(StoreError::Transport(reason)),
            Ok(_) => {}
            Err(error) => {
                tracing::debug!(error = %error, "ignoring unparseable frame before join reply");
            }
        }
    }

    Err(StoreError::Transport(
        "socket closed before join was acknowledged".to_owned(),
    ))
}

async fn run_channel(
    mut socket: Socket,
    topic: String,
    event_tx: mpsc::Sender<LiveEvent>,
    mut stop_rx: watch::Receiver<bool>,
    heartbeat_interval: Duration,
) {
    let mut heartbeat =
        tokio::time::interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut next_ref: u64 = 2;

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    let _ = socket
                        .send(Frame::Text(leave_frame(&topic, next_ref).to_string().into()))
                        .await;
                    let _ = socket.close(None).await;
                    tracing::info!(
                        code = REALTIME_CHANNEL_STOPPED,
                        topic = %topic,
                        "realtime channel left"
                    );
                    return;
                }
            }
            _ = heartbeat.tick() => {
                let frame = heartbeat_frame(next_ref);
                next_ref += 1;
                if let Err(error) = socket.send(Frame::Text(frame.to_string().into())).await {
                    tracing::warn!(
                        code = REALTIME_WRITE_FAILED,
                        topic = %topic,
                        error = %error,
                        "realtime heartbeat failed; closing channel"
                    );
                    return;
                }
            }
            frame = socket.next() => {
                let text = match frame {
                    Some(Ok(Frame::Text(text))) => text,
                    Some(Ok(Frame::Close(_))) | None => {
                        tracing::warn!(
                            code = REALTIME_CHANNEL_CLOSED,
                            topic = %topic,
                            "realtime socket closed by server"
                        );
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(error)) => {
                        tracing::warn!(
                            code = REALTIME_READ_FAILED,
                            topic = %topic,
                            error = %error,
                            "realtime socket read failed; closing channel"
                        );
                        return;
                    }
                };

                let event = match classify(&text, &topic) {
                    Ok(Inbound::Insert(record)) => message_from_value(record),
                    Ok(Inbound::Closed(reason)) => {
                        tracing::warn!(
                            code = REALTIME_CHANNEL_CLOSED,
                            topic = %topic,
                            reason = %reason,
                            "realtime channel closed"
                        );
                        return;
                    }
                    Ok(_) => continue,
                    Err(error) => {
                        tracing::debug!(error = %error, "ignoring unparseable realtime frame");
                        continue;
                    }
                };

                if event_tx.send(event).await.is_err() {
                    return;
                }
            }
        }
    }
}
