//! Read-modify-write for replaceable list events.
//!
//! Follow, mute, and den-subscription lists are replaceable: only the
//! newest event per (author, kind) is meaningful. Reads and writes go
//! through the broadcast set, and the newest copy is chosen across *all*
//! endpoints, so a relay that is behind cannot make a mutation act on
//! stale data and drop entries.
//!
//! Known limitation: two concurrent mutations from the same author (for
//! example two devices) can still race; the protocol has no causality
//! token, so the last publish wins and one update is lost.

use thiserror::Error;

use crate::event::{
    Event, Tag, UnsignedEvent, DEN_LIST_KIND, FOLLOW_LIST_KIND, MUTE_LIST_KIND,
};
use crate::relay::{Filter, GatewayError, Pool};
use crate::signer::{Signer, SignerError};

/// The replaceable list types foxden manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// Followed authors, one `p` tag per pubkey.
    Follows,
    /// Muted authors, one `p` tag per pubkey.
    Mutes,
    /// Subscribed dens, one `I` tag per identifier.
    DenSubscriptions,
}

impl ListKind {
    pub fn kind(&self) -> u32 {
        match self {
            ListKind::Follows => FOLLOW_LIST_KIND,
            ListKind::Mutes => MUTE_LIST_KIND,
            ListKind::DenSubscriptions => DEN_LIST_KIND,
        }
    }

    /// Tag name that carries one list entry.
    pub fn entry_tag(&self) -> &'static str {
        match self {
            ListKind::Follows | ListKind::Mutes => "p",
            ListKind::DenSubscriptions => "I",
        }
    }
}

/// Failures of a list mutation. A read that reaches no relay aborts the
/// operation rather than publishing over an assumed-empty list.
#[derive(Debug, Error)]
pub enum ListError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Signer(#[from] SignerError),
}

/// Outcome of an add/remove; no-ops produce no network write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListChange {
    Updated,
    Unchanged,
}

/// Replaceable-list reconciler bound to a pool and signer.
pub struct Lists<'a> {
    pool: &'a Pool,
    signer: &'a Signer,
}

impl<'a> Lists<'a> {
    pub fn new(pool: &'a Pool, signer: &'a Signer) -> Self {
        Self { pool, signer }
    }

    /// Current entries of an author's list. Empty and absent are the same
    /// on this read-only path.
    pub async fn read(&self, list: ListKind, pubkey: &str) -> Result<Vec<String>, GatewayError> {
        let current = self.fetch_current(list, pubkey).await?;
        Ok(current
            .map(|ev| {
                ev.tag_values(list.entry_tag())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Add an entry to the caller's list. No-op if already present.
    pub async fn add(&self, list: ListKind, entry: &str, now: u64) -> Result<ListChange, ListError> {
        let pubkey = self.signer.pubkey()?;
        let current = self.fetch_current(list, &pubkey).await?;

        if let Some(ev) = &current {
            if ev.tag_values(list.entry_tag()).any(|v| v == entry) {
                return Ok(ListChange::Unchanged);
            }
        }

        let (mut tags, content) = carried_state(list, current.as_ref());
        tags.push(Tag::new([list.entry_tag(), entry]));
        self.publish_list(list, tags, content, now).await?;
        Ok(ListChange::Updated)
    }

    /// Remove an entry from the caller's list. No-op if absent.
    pub async fn remove(
        &self,
        list: ListKind,
        entry: &str,
        now: u64,
    ) -> Result<ListChange, ListError> {
        let pubkey = self.signer.pubkey()?;
        let current = self.fetch_current(list, &pubkey).await?;

        let Some(ev) = current else {
            return Ok(ListChange::Unchanged);
        };
        if !ev.tag_values(list.entry_tag()).any(|v| v == entry) {
            return Ok(ListChange::Unchanged);
        }

        let (tags, content) = carried_state(list, Some(&ev));
        let tags: Vec<Tag> = tags
            .into_iter()
            .filter(|t| !(t.name() == Some(list.entry_tag()) && t.value() == Some(entry)))
            .collect();
        self.publish_list(list, tags, content, now).await?;
        Ok(ListChange::Updated)
    }

    /// Newest copy of the list across every broadcast endpoint. The merge
    /// is global, not per-endpoint: `(created_at, id)` max over all copies.
    async fn fetch_current(
        &self,
        list: ListKind,
        pubkey: &str,
    ) -> Result<Option<Event>, GatewayError> {
        let filter = Filter::new()
            .kinds([list.kind()])
            .authors([pubkey])
            .limit(1);
        let events = self.pool.broadcast_query(&[filter]).await?;
        Ok(events
            .into_iter()
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            }))
    }

    async fn publish_list(
        &self,
        list: ListKind,
        tags: Vec<Tag>,
        content: String,
        now: u64,
    ) -> Result<(), ListError> {
        let signed = self.signer.sign(UnsignedEvent {
            kind: list.kind(),
            created_at: now,
            tags,
            content,
        })?;
        self.pool.broadcast_publish(&signed).await?;
        Ok(())
    }
}

/// Tag set and content a new list version carries forward from the old one.
/// Follow and mute lists keep every prior tag and the content verbatim; the
/// den list is rebuilt from its `I` entries alone.
fn carried_state(list: ListKind, current: Option<&Event>) -> (Vec<Tag>, String) {
    match current {
        None => (Vec::new(), String::new()),
        Some(ev) => match list {
            ListKind::Follows | ListKind::Mutes => (ev.tags.clone(), ev.content.clone()),
            ListKind::DenSubscriptions => (
                ev.tags
                    .iter()
                    .filter(|t| t.name() == Some("I"))
                    .cloned()
                    .collect(),
                String::new(),
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::tests::{filter_matches, spawn_relay};
    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio_tungstenite::{accept_async, tungstenite::Message as TMsg};

    const TEST_KEY: &str = "0101010101010101010101010101010101010101010101010101010101010101";

    fn signer() -> Signer {
        Signer::from_secret_hex(Some(TEST_KEY)).unwrap()
    }

    fn list_event(id: &str, pubkey: &str, kind: u32, tags: Vec<Tag>, created_at: u64) -> Event {
        Event {
            id: id.into(),
            pubkey: pubkey.into(),
            kind,
            created_at,
            tags,
            content: "prior".into(),
            sig: String::new(),
        }
    }

    /// Fake relay that serves events and records accepted publishes.
    async fn spawn_recording_relay(
        events: Vec<Event>,
        published: Arc<Mutex<Vec<Event>>>,
    ) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let events = events.clone();
                let published = published.clone();
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    while let Some(Ok(msg)) = ws.next().await {
                        let TMsg::Text(txt) = msg else { continue };
                        let Ok(val) = serde_json::from_str::<Value>(&txt) else {
                            continue;
                        };
                        let arr = val.as_array().cloned().unwrap_or_default();
                        match arr.first().and_then(|v| v.as_str()) {
                            Some("REQ") => {
                                let sub = arr[1].as_str().unwrap_or_default().to_string();
                                for ev in &events {
                                    if arr[2..].iter().any(|f| filter_matches(f, ev)) {
                                        ws.send(TMsg::Text(
                                            json!(["EVENT", sub, ev]).to_string(),
                                        ))
                                        .await
                                        .unwrap();
                                    }
                                }
                                ws.send(TMsg::Text(json!(["EOSE", sub]).to_string()))
                                    .await
                                    .unwrap();
                            }
                            Some("EVENT") => {
                                let ev: Event = serde_json::from_value(arr[1].clone()).unwrap();
                                let id = ev.id.clone();
                                published.lock().unwrap().push(ev);
                                ws.send(TMsg::Text(json!(["OK", id, true, ""]).to_string()))
                                    .await
                                    .unwrap();
                            }
                            _ => {}
                        }
                    }
                });
            }
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn read_takes_newest_copy_across_all_endpoints() {
        let signer = signer();
        let me = signer.pubkey().unwrap();
        let stale = list_event(
            "aa11",
            &me,
            FOLLOW_LIST_KIND,
            vec![Tag::new(["p", "p1"])],
            10,
        );
        let fresh = list_event(
            "bb22",
            &me,
            FOLLOW_LIST_KIND,
            vec![Tag::new(["p", "p1"]), Tag::new(["p", "p2"])],
            20,
        );
        let behind = spawn_relay(vec![stale], true).await;
        let ahead = spawn_relay(vec![fresh], true).await;
        let pool = Pool::without_fallbacks(vec![behind, ahead], Duration::from_secs(2));

        let lists = Lists::new(&pool, &signer);
        let entries = lists.read(ListKind::Follows, &me).await.unwrap();
        assert_eq!(entries, vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn add_preserves_prior_tags_and_appends_delta() {
        let signer = signer();
        let me = signer.pubkey().unwrap();
        let existing = list_event(
            "aa11",
            &me,
            FOLLOW_LIST_KIND,
            vec![
                Tag::new(["p", "p1"]),
                Tag::new(["p", "p2"]),
                Tag::new(["client", "other"]),
            ],
            10,
        );
        let published = Arc::new(Mutex::new(Vec::new()));
        let relay = spawn_recording_relay(vec![existing], published.clone()).await;
        let pool = Pool::without_fallbacks(vec![relay], Duration::from_secs(2));

        let lists = Lists::new(&pool, &signer);
        let change = lists.add(ListKind::Follows, "p3", 100).await.unwrap();
        assert_eq!(change, ListChange::Updated);

        let written = published.lock().unwrap();
        assert_eq!(written.len(), 1);
        let ev = &written[0];
        assert_eq!(ev.kind, FOLLOW_LIST_KIND);
        assert_eq!(ev.created_at, 100);
        assert_eq!(ev.content, "prior");
        let ps: Vec<&str> = ev.tag_values("p").collect();
        assert_eq!(ps, vec!["p1", "p2", "p3"]);
        // The unrelated tag survived the rewrite.
        assert_eq!(ev.tag_value("client"), Some("other"));
    }

    #[tokio::test]
    async fn add_existing_entry_is_a_noop_without_write() {
        let signer = signer();
        let me = signer.pubkey().unwrap();
        let existing = list_event(
            "aa11",
            &me,
            MUTE_LIST_KIND,
            vec![Tag::new(["p", "p1"])],
            10,
        );
        // A relay that rejects all publishes: reaching it would fail the test.
        let relay = spawn_relay(vec![existing], false).await;
        let pool = Pool::without_fallbacks(vec![relay], Duration::from_secs(2));

        let lists = Lists::new(&pool, &signer);
        let change = lists.add(ListKind::Mutes, "p1", 100).await.unwrap();
        assert_eq!(change, ListChange::Unchanged);
    }

    #[tokio::test]
    async fn remove_absent_entry_is_a_noop() {
        let signer = signer();
        let me = signer.pubkey().unwrap();
        let existing = list_event(
            "aa11",
            &me,
            FOLLOW_LIST_KIND,
            vec![Tag::new(["p", "p1"])],
            10,
        );
        let relay = spawn_relay(vec![existing], false).await;
        let pool = Pool::without_fallbacks(vec![relay], Duration::from_secs(2));

        let lists = Lists::new(&pool, &signer);
        let change = lists.remove(ListKind::Follows, "p9", 100).await.unwrap();
        assert_eq!(change, ListChange::Unchanged);

        // Removing from a missing list is also a no-op, not an error.
        let empty_relay = spawn_relay(vec![], false).await;
        let pool = Pool::without_fallbacks(vec![empty_relay], Duration::from_secs(2));
        let lists = Lists::new(&pool, &signer);
        let change = lists.remove(ListKind::Follows, "p1", 100).await.unwrap();
        assert_eq!(change, ListChange::Unchanged);
    }

    #[tokio::test]
    async fn remove_drops_only_the_named_entry() {
        let signer = signer();
        let me = signer.pubkey().unwrap();
        let existing = list_event(
            "aa11",
            &me,
            MUTE_LIST_KIND,
            vec![
                Tag::new(["p", "p1"]),
                Tag::new(["p", "p2"]),
                Tag::new(["p", "p3"]),
                Tag::new(["word", "spoilers"]),
            ],
            10,
        );
        let published = Arc::new(Mutex::new(Vec::new()));
        let relay = spawn_recording_relay(vec![existing], published.clone()).await;
        let pool = Pool::without_fallbacks(vec![relay], Duration::from_secs(2));

        let lists = Lists::new(&pool, &signer);
        let change = lists.remove(ListKind::Mutes, "p2", 100).await.unwrap();
        assert_eq!(change, ListChange::Updated);

        let written = published.lock().unwrap();
        let ps: Vec<&str> = written[0].tag_values("p").collect();
        assert_eq!(ps, vec!["p1", "p3"]);
        assert_eq!(written[0].tag_value("word"), Some("spoilers"));
    }

    #[tokio::test]
    async fn den_list_rebuilds_from_identifier_entries() {
        let signer = signer();
        let me = signer.pubkey().unwrap();
        let existing = list_event(
            "aa11",
            &me,
            DEN_LIST_KIND,
            vec![Tag::new(["I", "#gaming"]), Tag::new(["p", "stray"])],
            10,
        );
        let published = Arc::new(Mutex::new(Vec::new()));
        let relay = spawn_recording_relay(vec![existing], published.clone()).await;
        let pool = Pool::without_fallbacks(vec![relay], Duration::from_secs(2));

        let lists = Lists::new(&pool, &signer);
        lists
            .add(ListKind::DenSubscriptions, "#rust", 100)
            .await
            .unwrap();

        let written = published.lock().unwrap();
        let idents: Vec<&str> = written[0].tag_values("I").collect();
        assert_eq!(idents, vec!["#gaming", "#rust"]);
        assert_eq!(written[0].tag_value("p"), None);
        assert_eq!(written[0].content, "");
    }

    #[tokio::test]
    async fn total_read_failure_aborts_the_mutation() {
        let signer = signer();
        let pool = Pool::without_fallbacks(
            vec!["ws://127.0.0.1:1".into()],
            Duration::from_millis(300),
        );
        let lists = Lists::new(&pool, &signer);
        let err = lists.add(ListKind::Follows, "p1", 100).await.unwrap_err();
        assert!(matches!(
            err,
            ListError::Gateway(GatewayError::AllRelaysFailed { .. })
        ));
    }

    #[tokio::test]
    async fn missing_identity_fails_before_any_network_read() {
        let signer = Signer::read_only();
        let pool = Pool::without_fallbacks(
            vec!["ws://127.0.0.1:1".into()],
            Duration::from_millis(100),
        );
        let lists = Lists::new(&pool, &signer);
        let err = lists.add(ListKind::Follows, "p1", 100).await.unwrap_err();
        assert!(matches!(err, ListError::Signer(SignerError::NoIdentity)));
    }
}
