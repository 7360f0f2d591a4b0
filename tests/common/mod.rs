#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use sqlx::types::Json as SqlJson;
use uuid::Uuid;

use courier::channels::{ChannelRegistry, ChannelSender, DeliveryError};
use courier::config::{Config, RunnerConfig, WhatsAppConfig};
use courier::db::QueueStore;
use courier::models::{Channel, MessagePayload, QueueItem, QueueStats, QueueStatus};

/// Fixed reference time so backoff assertions are exact.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

pub fn minutes(n: i64) -> chrono::Duration {
    chrono::Duration::minutes(n)
}

pub fn text(body: &str) -> MessagePayload {
    MessagePayload::Text {
        body: body.to_string(),
    }
}

/// A pending row that became due at `base_time()`, created `age_minutes` before it.
pub fn pending_item(recipient: &str, channel: Channel, priority: i32, age_minutes: i64) -> QueueItem {
    let created_at = base_time() - minutes(age_minutes);
    QueueItem {
        id: Uuid::now_v7(),
        recipient: recipient.to_string(),
        channel,
        payload: SqlJson(json!({"type": "text", "body": "Your payment of 5000 RWF was received"})),
        priority,
        status: QueueStatus::Pending,
        attempts: 0,
        next_attempt_at: base_time(),
        error_message: None,
        claimed_until: None,
        created_at,
        sent_at: None,
        updated_at: created_at,
    }
}

pub fn runner_config() -> RunnerConfig {
    RunnerConfig {
        row_delay: Duration::ZERO,
        ..RunnerConfig::default()
    }
}

pub fn test_config(trigger_token: Option<&str>) -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        host: "127.0.0.1".parse().unwrap(),
        port: 0,
        log_level: "warn".to_string(),
        trigger_token: trigger_token.map(str::to_string),
        run_interval: None,
        runner: runner_config(),
        whatsapp: WhatsAppConfig::default(),
    }
}

// ── In-memory queue store ───────────────────────────────────────

#[derive(Default)]
pub struct MemoryQueueStore {
    rows: Mutex<Vec<QueueItem>>,
    writes: AtomicUsize,
    pub fail_fetch: AtomicBool,
    pub lose_claims: AtomicBool,
    fail_mark_sent_for: Mutex<Option<Uuid>>,
    claims: Mutex<Vec<Claim>>,
}

/// A successful claim as the store saw it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Claim {
    pub id: Uuid,
    pub now: DateTime<Utc>,
    pub lease_until: DateTime<Utc>,
}

impl MemoryQueueStore {
    pub fn new(rows: Vec<QueueItem>) -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(rows),
            ..Default::default()
        })
    }

    pub fn get(&self, id: Uuid) -> QueueItem {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .expect("row exists")
    }

    pub fn claims(&self) -> Vec<Claim> {
        self.claims.lock().unwrap().clone()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_mark_sent_for(&self, id: Uuid) {
        *self.fail_mark_sent_for.lock().unwrap() = Some(id);
    }

    fn update_pending(&self, id: Uuid, f: impl FnOnce(&mut QueueItem)) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows
            .iter_mut()
            .find(|r| r.id == id && r.status == QueueStatus::Pending)
        {
            f(row);
            row.claimed_until = None;
        }
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn due_items(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<QueueItem>, sqlx::Error> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(sqlx::Error::Protocol("connection reset".to_string()));
        }
        let mut due: Vec<QueueItem> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn claim(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<QueueItem>, sqlx::Error> {
        if self.lose_claims.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.iter_mut().find(|r| r.id == id && r.is_due(now)) else {
            return Ok(None);
        };
        self.writes.fetch_add(1, Ordering::SeqCst);
        row.claimed_until = Some(lease_until);
        self.claims.lock().unwrap().push(Claim {
            id,
            now,
            lease_until,
        });
        Ok(Some(row.clone()))
    }

    async fn mark_sent(
        &self,
        id: Uuid,
        attempts: i32,
        sent_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        if *self.fail_mark_sent_for.lock().unwrap() == Some(id) {
            return Err(sqlx::Error::Protocol("update rejected".to_string()));
        }
        self.update_pending(id, |row| {
            row.status = QueueStatus::Sent;
            row.attempts = attempts;
            row.sent_at = Some(sent_at);
            row.error_message = None;
        });
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        self.update_pending(id, |row| {
            row.attempts = attempts;
            row.next_attempt_at = next_attempt_at;
            row.error_message = Some(error.to_string());
        });
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, attempts: i32, error: &str) -> Result<(), sqlx::Error> {
        self.update_pending(id, |row| {
            row.status = QueueStatus::Failed;
            row.attempts = attempts;
            row.error_message = Some(error.to_string());
        });
        Ok(())
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<QueueStats, sqlx::Error> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(sqlx::Error::Protocol("connection reset".to_string()));
        }
        let rows = self.rows.lock().unwrap();
        let mut stats = QueueStats::default();
        for row in rows.iter() {
            match row.status {
                QueueStatus::Pending => {
                    stats.pending += 1;
                    if row.is_due(now) {
                        stats.due += 1;
                    }
                }
                QueueStatus::Sent => stats.sent += 1,
                QueueStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}

// ── Scripted channel sender ─────────────────────────────────────

/// Replays queued outcomes, then falls back to `default`. Records every recipient.
pub struct ScriptedSender {
    channel: Channel,
    script: Mutex<VecDeque<Result<(), DeliveryError>>>,
    default: Result<(), DeliveryError>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSender {
    pub fn succeeding(channel: Channel) -> Arc<Self> {
        Self::with_default(channel, Ok(()))
    }

    pub fn failing(channel: Channel) -> Arc<Self> {
        Self::with_default(
            channel,
            Err(DeliveryError::Transient("provider unavailable".to_string())),
        )
    }

    pub fn with_default(channel: Channel, default: Result<(), DeliveryError>) -> Arc<Self> {
        Arc::new(Self {
            channel,
            script: Mutex::new(VecDeque::new()),
            default,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, outcome: Result<(), DeliveryError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelSender for ScriptedSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, recipient: &str, _payload: &MessagePayload) -> Result<(), DeliveryError> {
        self.calls.lock().unwrap().push(recipient.to_string());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }
}

pub fn registry(senders: Vec<Arc<dyn ChannelSender>>) -> ChannelRegistry {
    let mut channels = ChannelRegistry::new();
    for sender in senders {
        channels.register(sender);
    }
    channels
}

// ── HTTP test app ───────────────────────────────────────────────

pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// POST the run trigger, optionally with a bearer token.
    pub async fn trigger(&self, token: Option<&str>) -> (Value, StatusCode) {
        let mut req = self.client.post(self.url("/api/v1/queue/run"));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.expect("trigger request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn stats(&self, token: Option<&str>) -> (Value, StatusCode) {
        let mut req = self.client.get(self.url("/api/v1/queue/stats"));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.expect("stats request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }
}

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    addr
}

/// Spawn the service over the given store and senders.
pub async fn spawn_app(
    store: Arc<dyn QueueStore>,
    channels: ChannelRegistry,
    trigger_token: Option<&str>,
) -> TestApp {
    let state = courier::build_state(store, channels, test_config(trigger_token));
    let addr = serve(courier::router(state)).await;

    TestApp {
        addr,
        client: Client::new(),
    }
}

// ── Mock WhatsApp Graph API ─────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GraphRequest {
    pub version: String,
    pub phone_number_id: String,
    pub authorization: Option<String>,
    pub body: Value,
}

#[derive(Clone)]
struct GraphState {
    status: StatusCode,
    requests: Arc<Mutex<Vec<GraphRequest>>>,
}

pub struct MockGraph {
    pub base_url: String,
    requests: Arc<Mutex<Vec<GraphRequest>>>,
}

impl MockGraph {
    pub fn requests(&self) -> Vec<GraphRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn whatsapp_config(&self) -> WhatsAppConfig {
        WhatsAppConfig {
            access_token: Some("test-access-token".to_string()),
            phone_number_id: Some("1234567890".to_string()),
            api_base: self.base_url.clone(),
            api_version: "v18.0".to_string(),
        }
    }
}

async fn graph_messages(
    State(state): State<GraphState>,
    Path((version, phone_number_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.requests.lock().unwrap().push(GraphRequest {
        version,
        phone_number_id,
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });

    if state.status.is_success() {
        (
            state.status,
            Json(json!({ "messages": [{ "id": "wamid.test" }] })),
        )
    } else {
        (
            state.status,
            Json(json!({ "error": { "message": "mock failure" } })),
        )
    }
}

/// A Graph API stand-in that answers every message POST with `status`.
pub async fn spawn_graph(status: StatusCode) -> MockGraph {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let router = Router::new()
        .route("/{version}/{phone_number_id}/messages", post(graph_messages))
        .with_state(GraphState {
            status,
            requests: requests.clone(),
        });
    let addr = serve(router).await;

    MockGraph {
        base_url: format!("http://{addr}"),
        requests,
    }
}
