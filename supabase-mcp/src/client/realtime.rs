//! Realtime subscriptions and broadcast.
//!
//! Subscribing joins the channel over the project's Phoenix websocket
//! (`/realtime/v1/websocket`) and waits for the join reply; a refused or
//! failed join is an error. An accepted subscription keeps its socket open in
//! a background task that sends heartbeats until the subscription is removed.
//!
//! Subscriptions live in a [`SubscriptionRegistry`] partitioned by
//! [`EffectiveConfig::partition_key`](crate::config::EffectiveConfig::partition_key),
//! so a caller only sees and removes entries made with the same project and key.

use super::{BackendCause, BackendError, BackendResult, SupabaseClient};
use chrono::{DateTime, Utc};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Table change events a subscription can listen to.
pub const TABLE_EVENTS: [&str; 4] = ["INSERT", "UPDATE", "DELETE", "*"];

/// Registry key prefix for channel subscriptions.
pub const CHANNEL_KEY_PREFIX: &str = "channel_";

/// Event name used for broadcast messages.
pub const BROADCAST_EVENT: &str = "message";

/// Interval between Phoenix heartbeats.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

const JOIN_REF: &str = "1";
const PROTOCOL_VERSION: &str = "1.0.0";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubscriptionKind {
    /// Row changes on a table.
    Table {
        /// Table name.
        table: String,
        /// INSERT, UPDATE, DELETE or *.
        event: String,
        /// Optional row filter, e.g. `id=eq.1`.
        #[serde(skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
    },
    /// Broadcast messages on a channel.
    Channel {
        /// Channel name.
        channel: String,
    },
}

impl SubscriptionKind {
    /// Channel config sent with `phx_join`.
    fn join_config(&self) -> serde_json::Value {
        let postgres_changes = match self {
            SubscriptionKind::Table { table, event, filter } => {
                let mut change = serde_json::json!({
                    "event": event,
                    "schema": "public",
                    "table": table,
                });
                if let Some(filter) = filter {
                    change["filter"] = serde_json::Value::String(filter.clone());
                }
                vec![change]
            }
            SubscriptionKind::Channel { .. } => Vec::new(),
        };

        serde_json::json!({
            "broadcast": {"self": false, "ack": false},
            "presence": {"key": ""},
            "postgres_changes": postgres_changes,
        })
    }
}

/// A joined subscription.
#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    /// Unique id.
    pub id: Uuid,

    /// Registry key: the table name, or `channel_<name>`.
    pub key: String,

    /// Realtime topic.
    pub topic: String,

    /// What is being listened to.
    #[serde(flatten)]
    pub kind: SubscriptionKind,

    /// When the subscription was created.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Entry {
    subscription: Subscription,
    channel: JoinHandle<()>,
}

/// Process-wide subscription store. Removing an entry closes its channel.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    by_partition: RwLock<HashMap<String, BTreeMap<String, Entry>>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a subscription and the task holding its channel open, replacing
    /// (and closing) any previous one under the same key.
    pub async fn insert(
        &self,
        partition: &str,
        subscription: Subscription,
        channel: JoinHandle<()>,
    ) -> Option<Subscription> {
        let mut by_partition = self.by_partition.write().await;
        let previous = by_partition
            .entry(partition.to_string())
            .or_default()
            .insert(subscription.key.clone(), Entry { subscription, channel });

        previous.map(|entry| {
            entry.channel.abort();
            entry.subscription
        })
    }

    /// Remove a subscription by key and close its channel.
    pub async fn remove(&self, partition: &str, key: &str) -> Option<Subscription> {
        let mut by_partition = self.by_partition.write().await;
        let entries = by_partition.get_mut(partition)?;
        let removed = entries.remove(key);
        if entries.is_empty() {
            by_partition.remove(partition);
        }

        removed.map(|entry| {
            entry.channel.abort();
            entry.subscription
        })
    }

    /// Subscriptions of one partition, ordered by key.
    pub async fn list(&self, partition: &str) -> Vec<Subscription> {
        self.by_partition
            .read()
            .await
            .get(partition)
            .map(|entries| entries.values().map(|e| e.subscription.clone()).collect())
            .unwrap_or_default()
    }

    /// Total number of subscriptions across partitions.
    pub async fn len(&self) -> usize {
        self.by_partition.read().await.values().map(BTreeMap::len).sum()
    }

    /// Whether no subscriptions exist.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Normalize a table event name, rejecting unknown ones.
pub fn normalize_event(event: Option<&str>) -> Result<String, BackendCause> {
    let event = event.map(|e| e.trim().to_uppercase()).unwrap_or_else(|| "*".to_string());
    if TABLE_EVENTS.contains(&event.as_str()) {
        Ok(event)
    } else {
        Err(BackendCause::InvalidInput(format!(
            "unsupported event '{}', expected one of {}",
            event,
            TABLE_EVENTS.join(", ")
        )))
    }
}

/// Phoenix channel message.
#[derive(Debug, Deserialize)]
struct PhoenixMessage {
    topic: String,
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default, rename = "ref")]
    reference: Option<String>,
}

fn realtime_error(e: impl std::fmt::Display) -> BackendCause {
    BackendCause::Realtime(e.to_string())
}

impl SupabaseClient {
    fn partition(&self) -> String {
        self.config().partition_key()
    }

    /// Websocket endpoint of the project, authenticated with the API key.
    fn websocket_url(&self) -> String {
        let url = self.config().url("/realtime/v1/websocket");
        let url = if let Some(rest) = url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            url
        };
        format!("{}?apikey={}&vsn={}", url, self.config().api_key, PROTOCOL_VERSION)
    }

    /// Subscribe to row changes on a table.
    #[instrument(skip(self), fields(table = %table))]
    pub async fn subscribe_table(
        &self,
        table: &str,
        event: Option<&str>,
        filter: Option<&str>,
    ) -> BackendResult<Subscription> {
        let kind = normalize_event(event)
            .map(|event| SubscriptionKind::Table {
                table: table.to_string(),
                event,
                filter: filter.filter(|f| !f.is_empty()).map(str::to_string),
            })
            .map_err(|cause| BackendError::new("subscribe", Some(table), cause))?;

        self.subscribe(table.to_string(), format!("realtime:public:{}", table), kind)
            .await
            .map_err(|cause| BackendError::new("subscribe", Some(table), cause))
    }

    /// Subscribe to broadcast messages on a channel.
    #[instrument(skip(self), fields(channel = %channel))]
    pub async fn subscribe_channel(&self, channel: &str) -> BackendResult<Subscription> {
        let kind = SubscriptionKind::Channel {
            channel: channel.to_string(),
        };

        self.subscribe(
            format!("{}{}", CHANNEL_KEY_PREFIX, channel),
            format!("realtime:{}", channel),
            kind,
        )
        .await
        .map_err(|cause| BackendError::new("subscribe channel", Some(channel), cause))
    }

    async fn subscribe(
        &self,
        key: String,
        topic: String,
        kind: SubscriptionKind,
    ) -> Result<Subscription, BackendCause> {
        let payload = serde_json::json!({
            "config": kind.join_config(),
            "access_token": self.bearer().await,
        });
        let channel = self.join_channel(&topic, payload).await?;

        let subscription = Subscription {
            id: Uuid::now_v7(),
            key,
            topic,
            kind,
            created_at: Utc::now(),
        };

        if self
            .shared
            .subscriptions
            .insert(&self.partition(), subscription.clone(), channel)
            .await
            .is_some()
        {
            debug!("Replaced existing subscription for {}", subscription.key);
        }
        info!(subscription_id = %subscription.id, topic = %subscription.topic, "Subscribed");
        Ok(subscription)
    }

    /// Open a socket, join `topic` and hand the socket to a heartbeat task.
    async fn join_channel(
        &self,
        topic: &str,
        payload: serde_json::Value,
    ) -> Result<JoinHandle<()>, BackendCause> {
        let (socket, _) = tokio::time::timeout(self.timeout, connect_async(self.websocket_url()))
            .await
            .map_err(|_| realtime_error("connection timed out"))?
            .map_err(realtime_error)?;
        let (mut sink, mut stream) = socket.split();

        let join = serde_json::json!({
            "topic": topic,
            "event": "phx_join",
            "payload": payload,
            "ref": JOIN_REF,
            "join_ref": JOIN_REF,
        });
        sink.send(Message::Text(join.to_string()))
            .await
            .map_err(realtime_error)?;

        let reply = tokio::time::timeout(self.timeout, join_reply(&mut stream, topic))
            .await
            .map_err(|_| realtime_error("join timed out"))??;

        if reply.get("status").and_then(|s| s.as_str()) != Some("ok") {
            let reason = reply
                .pointer("/response/reason")
                .and_then(|r| r.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| reply.to_string());
            warn!(topic = %topic, "Channel join refused: {}", reason);
            return Err(realtime_error(format!("join refused: {}", reason)));
        }

        Ok(tokio::spawn(hold_channel(sink, stream, topic.to_string())))
    }

    /// Remove a subscription by key (table name or `channel_<name>`) and close
    /// its channel. Returns whether one existed.
    #[instrument(skip(self))]
    pub async fn unsubscribe_table(&self, key: &str) -> bool {
        self.shared
            .subscriptions
            .remove(&self.partition(), key)
            .await
            .is_some()
    }

    /// Subscriptions held for this project and key.
    pub async fn list_subscriptions(&self) -> Vec<Subscription> {
        self.shared.subscriptions.list(&self.partition()).await
    }

    /// Send a message to every listener on a channel.
    #[instrument(skip(self, message), fields(channel = %channel))]
    pub async fn broadcast(&self, channel: &str, message: &serde_json::Value) -> BackendResult<()> {
        let result: Result<(), BackendCause> = async {
            let response = self
                .request(Method::POST, "/realtime/v1/api/broadcast")
                .await
                .json(&serde_json::json!({
                    "messages": [{
                        "topic": channel,
                        "event": BROADCAST_EVENT,
                        "payload": message,
                    }]
                }))
                .send()
                .await?;
            Self::check_status(response).await?;
            Ok(())
        }
        .await;

        result.map_err(|cause| BackendError::new("broadcast", Some(channel), cause))
    }
}

/// Wait for the `phx_reply` to our join and return its payload.
async fn join_reply(
    stream: &mut SplitStream<Socket>,
    topic: &str,
) -> Result<serde_json::Value, BackendCause> {
    while let Some(message) = stream.next().await {
        match message.map_err(realtime_error)? {
            Message::Text(text) => {
                let Ok(message) = serde_json::from_str::<PhoenixMessage>(&text) else {
                    continue;
                };
                if message.event == "phx_reply"
                    && message.topic == topic
                    && message.reference.as_deref() == Some(JOIN_REF)
                {
                    return Ok(message.payload);
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(realtime_error("connection closed before the join was answered"))
}

/// Keep a joined channel alive until the socket closes or the task is aborted.
async fn hold_channel(
    mut sink: SplitSink<Socket, Message>,
    mut stream: SplitStream<Socket>,
    topic: String,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut next_ref: u64 = 1;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                next_ref += 1;
                let beat = serde_json::json!({
                    "topic": "phoenix",
                    "event": "heartbeat",
                    "payload": {},
                    "ref": next_ref.to_string(),
                });
                if let Err(e) = sink.send(Message::Text(beat.to_string())).await {
                    warn!(topic = %topic, "Realtime heartbeat failed: {}", e);
                    break;
                }
            }
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => debug!(topic = %topic, "Realtime message: {}", text),
                Some(Ok(Message::Close(_))) | None => {
                    info!(topic = %topic, "Realtime channel closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(topic = %topic, "Realtime channel failed: {}", e);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{next_event, spawn_realtime_server, test_client};
    use crate::client::SharedState;
    use crate::config::{EffectiveConfig, ProjectDefaults};
    use std::sync::Arc;

    #[test]
    fn test_normalize_event() {
        assert_eq!(normalize_event(None).unwrap(), "*");
        assert_eq!(normalize_event(Some("insert")).unwrap(), "INSERT");
        assert!(normalize_event(Some("TRUNCATE")).is_err());
    }

    #[test]
    fn test_websocket_url() {
        let client = test_client("https://abcd.supabase.co/");
        assert_eq!(
            client.websocket_url(),
            "wss://abcd.supabase.co/realtime/v1/websocket?apikey=anon-key&vsn=1.0.0"
        );
    }

    #[test]
    fn test_join_config() {
        let kind = SubscriptionKind::Table {
            table: "orders".to_string(),
            event: "UPDATE".to_string(),
            filter: Some("id=eq.1".to_string()),
        };
        let config = kind.join_config();
        assert_eq!(config["postgres_changes"][0]["table"], "orders");
        assert_eq!(config["postgres_changes"][0]["filter"], "id=eq.1");

        let channel = SubscriptionKind::Channel {
            channel: "lobby".to_string(),
        };
        assert!(channel.join_config()["postgres_changes"]
            .as_array()
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let (base_url, mut events) = spawn_realtime_server("ok").await;
        let client = test_client(&base_url);

        let sub = client
            .subscribe_table("orders", Some("update"), Some("id=eq.1"))
            .await
            .unwrap();
        assert_eq!(sub.key, "orders");
        assert_eq!(sub.topic, "realtime:public:orders");
        assert_eq!(next_event(&mut events).await, "join realtime:public:orders");

        client.subscribe_channel("lobby").await.unwrap();
        assert_eq!(next_event(&mut events).await, "join realtime:lobby");

        let keys: Vec<_> = client
            .list_subscriptions()
            .await
            .into_iter()
            .map(|s| s.key)
            .collect();
        assert_eq!(keys, vec!["channel_lobby", "orders"]);

        assert!(client.unsubscribe_table("orders").await);
        assert_eq!(next_event(&mut events).await, "closed");
        assert!(!client.unsubscribe_table("orders").await);
        assert!(client.unsubscribe_table("channel_lobby").await);
        assert_eq!(next_event(&mut events).await, "closed");
        assert!(client.list_subscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn test_resubscribe_replaces() {
        let (base_url, mut events) = spawn_realtime_server("ok").await;
        let client = test_client(&base_url);

        client.subscribe_table("orders", None, None).await.unwrap();
        next_event(&mut events).await;
        client.subscribe_table("orders", Some("DELETE"), None).await.unwrap();
        next_event(&mut events).await;

        // The first channel is closed when replaced.
        assert_eq!(next_event(&mut events).await, "closed");

        let subs = client.list_subscriptions().await;
        assert_eq!(subs.len(), 1);
        assert!(matches!(
            &subs[0].kind,
            SubscriptionKind::Table { event, .. } if event == "DELETE"
        ));
    }

    #[tokio::test]
    async fn test_refused_join_is_error() {
        let (base_url, mut events) = spawn_realtime_server("error").await;
        let client = test_client(&base_url);

        let err = client.subscribe_table("orders", None, None).await.unwrap_err();
        assert!(matches!(&err.cause, BackendCause::Realtime(m) if m.contains("join denied")));
        assert_eq!(next_event(&mut events).await, "join realtime:public:orders");
        assert!(client.list_subscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_project_is_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = test_client(&format!("http://{}", addr));
        let err = client.subscribe_channel("lobby").await.unwrap_err();
        assert!(matches!(err.cause, BackendCause::Realtime(_)));
        assert!(client.list_subscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_event_is_rejected() {
        let client = test_client("https://abcd.supabase.co");
        let err = client
            .subscribe_table("orders", Some("TRUNCATE"), None)
            .await
            .unwrap_err();
        assert!(matches!(err.cause, BackendCause::InvalidInput(_)));
        assert!(client.list_subscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn test_registry_partitioned_by_credentials() {
        let (base_url, _events) = spawn_realtime_server("ok").await;
        let shared = Arc::new(SharedState::new());
        let defaults = ProjectDefaults {
            tenant_url_template: format!("{}/{{project}}", base_url),
            ..Default::default()
        };

        let client_for = |project: &str, token: &str| {
            let config = EffectiveConfig::resolve(Some(project), Some(token), &defaults).unwrap();
            SupabaseClient::new(Arc::new(config), Duration::from_secs(5), shared.clone()).unwrap()
        };
        let owner = client_for("tenant-a", "real-service-key");
        let other_project = client_for("tenant-b", "real-service-key");
        let stranger = client_for("tenant-a", "bogus");

        owner.subscribe_table("orders", None, None).await.unwrap();

        assert_eq!(owner.list_subscriptions().await.len(), 1);
        assert!(other_project.list_subscriptions().await.is_empty());
        assert!(!other_project.unsubscribe_table("orders").await);
        assert!(stranger.list_subscriptions().await.is_empty());
        assert!(!stranger.unsubscribe_table("orders").await);
        assert_eq!(shared.subscriptions.len().await, 1);
        assert_eq!(owner.list_subscriptions().await.len(), 1);
    }
}
