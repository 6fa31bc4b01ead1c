//! Multi-relay gateway: concurrent fan-out queries and publishes.
//!
//! Every call issues the same request to a set of relay endpoints at once,
//! each bounded by the pool timeout. Reads are best-effort: a failing
//! endpoint contributes nothing and results are merged and deduplicated by
//! event id. Writes succeed as soon as one endpoint acknowledges.
//! Cancellation is cooperative: dropping a returned future tears down all
//! in-flight connections at their next await point.

use std::{collections::HashMap, time::Duration};

use anyhow::{anyhow, Result};
use futures_util::{future::join_all, SinkExt, StreamExt};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{client_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::event::Event;

/// Relays always included in the broadcast set for replaceable-list reads
/// and writes, so a stale user relay list cannot cause silent data loss.
pub const FALLBACK_RELAYS: &[&str] = &[
    "wss://relay.ditto.pub",
    "wss://relay.primal.net",
    "wss://relay.damus.io",
    "wss://nos.lol",
];

/// Gateway failures surfaced to callers. Individual endpoint errors are
/// logged and swallowed; only a total miss is reported.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Every endpoint in the set failed or timed out.
    #[error("no relay accepted the request ({attempted} attempted)")]
    AllRelaysFailed { attempted: usize },
}

/// Subscription filter sent to relays as part of a `REQ`.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub ids: Option<Vec<String>>,
    pub kinds: Option<Vec<u32>>,
    pub authors: Option<Vec<String>>,
    /// Tag-equality constraints keyed by tag name, serialized as `#<name>`.
    pub tags: Vec<(String, Vec<String>)>,
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub limit: Option<usize>,
    /// Free-text search term; best-effort, not every relay supports it.
    pub search: Option<String>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u32>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn authors(mut self, authors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    pub fn tag(mut self, name: &str, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags
            .push((name.to_string(), values.into_iter().map(Into::into).collect()));
        self
    }

    pub fn since(mut self, ts: u64) -> Self {
        self.since = Some(ts);
        self
    }

    pub fn until(mut self, ts: u64) -> Self {
        self.until = Some(ts);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    /// Wire representation as a NIP-01 filter object.
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        if let Some(ids) = &self.ids {
            map.insert(
                "ids".into(),
                Value::Array(ids.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(kinds) = &self.kinds {
            map.insert(
                "kinds".into(),
                Value::Array(kinds.iter().map(|k| Value::Number((*k).into())).collect()),
            );
        }
        if let Some(authors) = &self.authors {
            map.insert(
                "authors".into(),
                Value::Array(authors.iter().cloned().map(Value::String).collect()),
            );
        }
        for (name, values) in &self.tags {
            map.insert(
                format!("#{name}"),
                Value::Array(values.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(since) = self.since {
            map.insert("since".into(), Value::Number(since.into()));
        }
        if let Some(until) = self.until {
            map.insert("until".into(), Value::Number(until.into()));
        }
        if let Some(limit) = self.limit {
            map.insert("limit".into(), Value::Number(limit.into()));
        }
        if let Some(search) = &self.search {
            map.insert("search".into(), Value::String(search.clone()));
        }
        Value::Object(map)
    }
}

/// Connection pool over the configured relay endpoints.
///
/// Injected into every component that needs network access so tests can
/// point it at in-process fake relays.
#[derive(Debug, Clone)]
pub struct Pool {
    relays: Vec<String>,
    broadcast: Vec<String>,
    timeout: Duration,
    tor_socks: Option<String>,
}

impl Pool {
    /// Build a pool from the user's relay list. The broadcast set is the
    /// user relays plus any extras plus [`FALLBACK_RELAYS`], deduplicated.
    pub fn new(
        relays: Vec<String>,
        extra_broadcast: Vec<String>,
        timeout: Duration,
        tor_socks: Option<String>,
    ) -> Self {
        let mut broadcast = relays.clone();
        for url in extra_broadcast
            .iter()
            .map(String::as_str)
            .chain(FALLBACK_RELAYS.iter().copied())
        {
            if !broadcast.iter().any(|r| r == url) {
                broadcast.push(url.to_string());
            }
        }
        Self {
            relays,
            broadcast,
            timeout,
            tor_socks,
        }
    }

    /// Pool using only the given endpoints for broadcast as well; used by
    /// tests and by callers that manage their own fallback policy.
    pub fn without_fallbacks(relays: Vec<String>, timeout: Duration) -> Self {
        Self {
            broadcast: relays.clone(),
            relays,
            timeout,
            tor_socks: None,
        }
    }

    /// Endpoints used for replaceable-list reads and writes.
    pub fn broadcast_relays(&self) -> &[String] {
        &self.broadcast
    }

    /// Best-effort query against the user relays. Endpoint failures are
    /// swallowed; if every endpoint fails the result is simply empty.
    pub async fn query(&self, filters: &[Filter]) -> Vec<Event> {
        self.fan_out_query(&self.relays, filters).await.0
    }

    /// Query that distinguishes "no events" from "no relay answered".
    /// Required before read-modify-write of replaceable lists.
    pub async fn query_checked(&self, filters: &[Filter]) -> Result<Vec<Event>, GatewayError> {
        let (events, succeeded) = self.fan_out_query(&self.relays, filters).await;
        if succeeded == 0 && !self.relays.is_empty() {
            return Err(GatewayError::AllRelaysFailed {
                attempted: self.relays.len(),
            });
        }
        Ok(events)
    }

    /// Checked query against the broadcast set. The newest copy of a
    /// replaceable event may live on any endpoint, so the merge is global.
    pub async fn broadcast_query(&self, filters: &[Filter]) -> Result<Vec<Event>, GatewayError> {
        let (events, succeeded) = self.fan_out_query(&self.broadcast, filters).await;
        if succeeded == 0 && !self.broadcast.is_empty() {
            return Err(GatewayError::AllRelaysFailed {
                attempted: self.broadcast.len(),
            });
        }
        Ok(events)
    }

    /// Publish to the user relays; succeeds if at least one acknowledges.
    pub async fn publish(&self, event: &Event) -> Result<(), GatewayError> {
        self.fan_out_publish(&self.relays, event).await
    }

    /// Publish to the broadcast set; used for replaceable lists.
    pub async fn broadcast_publish(&self, event: &Event) -> Result<(), GatewayError> {
        self.fan_out_publish(&self.broadcast, event).await
    }

    async fn fan_out_query(&self, endpoints: &[String], filters: &[Filter]) -> (Vec<Event>, usize) {
        let results = join_all(endpoints.iter().map(|url| async move {
            let res = timeout(self.timeout, query_relay(url, filters, self.tor_socks.as_deref()))
                .await
                .map_err(|_| anyhow!("timed out"))
                .and_then(|r| r);
            (url, res)
        }))
        .await;

        let mut by_id: HashMap<String, Event> = HashMap::new();
        let mut succeeded = 0;
        for (url, res) in results {
            match res {
                Ok(events) => {
                    succeeded += 1;
                    for ev in events {
                        by_id.entry(ev.id.clone()).or_insert(ev);
                    }
                }
                Err(e) => warn!(relay = %url, error = %e, "query failed"),
            }
        }
        (by_id.into_values().collect(), succeeded)
    }

    async fn fan_out_publish(&self, endpoints: &[String], event: &Event) -> Result<(), GatewayError> {
        let results = join_all(endpoints.iter().map(|url| async move {
            let res = timeout(self.timeout, publish_relay(url, event, self.tor_socks.as_deref()))
                .await
                .map_err(|_| anyhow!("timed out"))
                .and_then(|r| r);
            (url, res)
        }))
        .await;

        let mut succeeded = 0;
        for (url, res) in results {
            match res {
                Ok(()) => {
                    succeeded += 1;
                    debug!(relay = %url, id = %event.id, "publish accepted");
                }
                Err(e) => warn!(relay = %url, error = %e, "publish failed"),
            }
        }
        if succeeded == 0 {
            return Err(GatewayError::AllRelaysFailed {
                attempted: endpoints.len(),
            });
        }
        Ok(())
    }
}

/// Subscribe once, drain events until EOSE, close, and return the batch.
async fn query_relay(
    relay: &str,
    filters: &[Filter],
    tor_socks: Option<&str>,
) -> Result<Vec<Event>> {
    let mut ws = connect_ws(relay, tor_socks).await?;
    let mut req = vec![
        Value::String("REQ".into()),
        Value::String("foxden".into()),
    ];
    req.extend(filters.iter().map(Filter::to_json));
    ws.send(Message::Text(Value::Array(req).to_string())).await?;

    let mut events = Vec::new();
    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(txt) => {
                if let Ok(val) = serde_json::from_str::<Value>(&txt) {
                    if let Some(arr) = val.as_array() {
                        match arr.first().and_then(|v| v.as_str()) {
                            Some("EVENT") if arr.len() >= 3 => {
                                if let Ok(ev) = serde_json::from_value::<Event>(arr[2].clone()) {
                                    events.push(ev);
                                }
                            }
                            Some("EOSE") | Some("CLOSED") => break,
                            _ => {}
                        }
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    let _ = ws
        .send(Message::Text(json!(["CLOSE", "foxden"]).to_string()))
        .await;
    Ok(events)
}

/// Send one event and wait for its `OK` acknowledgement.
async fn publish_relay(relay: &str, event: &Event, tor_socks: Option<&str>) -> Result<()> {
    let mut ws = connect_ws(relay, tor_socks).await?;
    ws.send(Message::Text(json!(["EVENT", event]).to_string()))
        .await?;
    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(txt) => {
                if let Ok(val) = serde_json::from_str::<Value>(&txt) {
                    if let Some(arr) = val.as_array() {
                        if arr.first().and_then(|v| v.as_str()) == Some("OK")
                            && arr.get(1).and_then(|v| v.as_str()) == Some(event.id.as_str())
                        {
                            let accepted = arr.get(2).and_then(|v| v.as_bool()).unwrap_or(false);
                            if accepted {
                                return Ok(());
                            }
                            let reason = arr.get(3).and_then(|v| v.as_str()).unwrap_or("rejected");
                            return Err(anyhow!("relay rejected event: {reason}"));
                        }
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(anyhow!("connection closed before acknowledgement"))
}

/// Establish a WebSocket connection, optionally via a SOCKS5 proxy.
async fn connect_ws(
    relay: &str,
    tor_socks: Option<&str>,
) -> Result<WebSocketStream<Box<dyn AsyncReadWrite + Unpin + Send>>> {
    let url = Url::parse(relay)?;
    let host = url.host_str().ok_or_else(|| anyhow!("missing host"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| anyhow!("missing port"))?;
    let req = relay.into_client_request()?;
    let stream: Box<dyn AsyncReadWrite + Unpin + Send> = if let Some(proxy) = tor_socks {
        Box::new(Socks5Stream::connect(proxy, (host, port)).await?)
    } else {
        Box::new(TcpStream::connect((host, port)).await?)
    };
    let (ws, _) = client_async(req, stream).await?;
    Ok(ws)
}

/// Blanket trait for boxed async read/write streams.
trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}
