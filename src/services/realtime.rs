use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{
    task::JoinHandle,
    time::{self, Instant},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::{
    error::{DraftServiceError, RemoteCause},
    models::draft::{timestamp, Draft},
    services::remote_drafts::RemoteDraftService,
};

const HEARTBEAT_EVERY: Duration = Duration::from_secs(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row event from the drafts change feed.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftChange {
    pub kind: ChangeKind,
    pub record: Option<Draft>,
    pub old_id: Option<String>,
    pub commit_timestamp: Option<DateTime<Utc>>,
}

impl DraftChange {
    pub fn id(&self) -> Option<&str> {
        self.record
            .as_ref()
            .map(|draft| draft.id.as_str())
            .or(self.old_id.as_deref())
    }
}

#[derive(Debug, PartialEq)]
pub enum Inbound {
    Change(DraftChange),
    Rejected(String),
    Ignored,
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
struct ChangeData {
    #[serde(rename = "type", alias = "eventType")]
    kind: String,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default, alias = "old")]
    old_record: Option<Value>,
    #[serde(default)]
    commit_timestamp: Option<String>,
}

pub fn channel_topic(user_id: &str) -> String {
    format!("realtime:drafts:user_id=eq.{user_id}")
}

pub fn join_message(user_id: &str, access_token: Option<&str>) -> Value {
    let mut payload = json!({
        "config": {
            "broadcast": { "ack": false, "self": false },
            "presence": { "key": "" },
            "postgres_changes": [{
                "event": "*",
                "schema": "public",
                "table": "drafts",
                "filter": format!("user_id=eq.{user_id}"),
            }],
            "private": false,
        }
    });
    if let Some(token) = access_token {
        payload["access_token"] = Value::String(token.to_string());
    }
    json!({
        "topic": channel_topic(user_id),
        "event": "phx_join",
        "payload": payload,
        "ref": "1",
        "join_ref": "1",
    })
}

fn heartbeat_message(reference: u64) -> Value {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": reference.to_string(),
    })
}

/// Decodes one socket frame. Accepts both the `postgres_changes` envelope and
/// the older per-event (`INSERT`, `UPDATE`, `DELETE`) form.
pub fn decode_message(text: &str) -> Result<Inbound, RemoteCause> {
    let envelope: Envelope = serde_json::from_str(text)?;
    let data = match envelope.event.as_str() {
        "postgres_changes" => envelope.payload.get("data").cloned().unwrap_or(Value::Null),
        "INSERT" | "UPDATE" | "DELETE" => envelope.payload,
        "phx_reply" => {
            let status = envelope.payload.get("status").and_then(Value::as_str);
            if status == Some("error") {
                let reason = envelope
                    .payload
                    .get("response")
                    .map(Value::to_string)
                    .unwrap_or_default();
                return Ok(Inbound::Rejected(reason));
            }
            return Ok(Inbound::Ignored);
        }
        "phx_error" => return Ok(Inbound::Rejected("channel error".into())),
        _ => return Ok(Inbound::Ignored),
    };
    if data.is_null() {
        return Ok(Inbound::Ignored);
    }

    let data: ChangeData = serde_json::from_value(data)?;
    let kind = match data.kind.as_str() {
        "INSERT" => ChangeKind::Insert,
        "UPDATE" => ChangeKind::Update,
        "DELETE" => ChangeKind::Delete,
        _ => return Ok(Inbound::Ignored),
    };
    let record = match non_empty(data.record) {
        Some(value) => Some(serde_json::from_value::<Draft>(value)?),
        None => None,
    };
    let old_id = non_empty(data.old_record).and_then(|old| {
        old.get("id").and_then(Value::as_str).map(str::to_string)
    });

    Ok(Inbound::Change(DraftChange {
        kind,
        record,
        old_id,
        commit_timestamp: data.commit_timestamp.as_deref().and_then(timestamp::parse),
    }))
}

fn non_empty(value: Option<Value>) -> Option<Value> {
    value.filter(|value| match value {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    })
}

/// Live change feed. Dropping or disposing the handle stops delivery.
pub struct SubscriptionHandle {
    topic: String,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn dispose(self) {}
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
        debug!(topic = %self.topic, "realtime subscription disposed");
    }
}

impl RemoteDraftService {
    /// Joins the user's drafts channel and hands every row event to
    /// `on_change` in arrival order. Events are hints; callers reconcile.
    pub async fn subscribe_to_drafts<F>(
        &self,
        user_id: &str,
        mut on_change: F,
    ) -> Result<SubscriptionHandle, DraftServiceError>
    where
        F: FnMut(DraftChange) + Send + 'static,
    {
        let url = self
            .client()
            .realtime_url()
            .map_err(|err| DraftServiceError::Fetch(err.into()))?;
        let (socket, _) = connect_async(url.as_str())
            .await
            .map_err(|err| DraftServiceError::Fetch(err.into()))?;
        let (mut sink, mut stream) = socket.split();

        let topic = channel_topic(user_id);
        let join = join_message(user_id, self.access_token());
        sink.send(Message::Text(join.to_string()))
            .await
            .map_err(|err| DraftServiceError::Fetch(err.into()))?;
        info!(topic = %topic, "joined realtime drafts channel");

        let task_topic = topic.clone();
        let task = tokio::spawn(async move {
            let mut heartbeat = time::interval_at(Instant::now() + HEARTBEAT_EVERY, HEARTBEAT_EVERY);
            let mut reference: u64 = 2;
            loop {
                tokio::select! {
                    _ = heartbeat.tick() => {
                        let beat = heartbeat_message(reference);
                        reference += 1;
                        if let Err(err) = sink.send(Message::Text(beat.to_string())).await {
                            warn!(topic = %task_topic, error = %err, "realtime heartbeat failed");
                            break;
                        }
                    }
                    frame = stream.next() => match frame {
                        Some(Ok(Message::Text(text))) => match decode_message(&text) {
                            Ok(Inbound::Change(change)) => on_change(change),
                            Ok(Inbound::Rejected(reason)) => {
                                warn!(topic = %task_topic, %reason, "realtime channel rejected");
                                break;
                            }
                            Ok(Inbound::Ignored) => {}
                            Err(err) => warn!(topic = %task_topic, error = %err, "skipping malformed realtime frame"),
                        },
                        Some(Ok(Message::Close(_))) | None => {
                            info!(topic = %task_topic, "realtime channel closed");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(topic = %task_topic, error = %err, "realtime socket error");
                            break;
                        }
                    }
                }
            }
        });

        Ok(SubscriptionHandle { topic, task })
    }
}
