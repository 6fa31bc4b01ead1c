//! Feed assembly: cursor-paginated post lists with engagement metrics.
//!
//! A feed page is fetched in two phases: one query for the posts, then the
//! three metric queries (votes, zaps, reply counts) issued concurrently so
//! the round-trip count stays flat regardless of page size. Each metric arm
//! degrades to zeroes on failure; a feed never errors, it thins out.

use std::cmp::Ordering;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::aggregate::{
    fetch_batch_reply_counts, fetch_batch_votes, fetch_batch_zaps, Metrics,
};
use crate::cache::{cache_key, QueryCache};
use crate::den::{den_to_identifier, event_den, is_top_level_post};
use crate::event::{Event, COMMENT_KIND, HASHTAG_KIND, ZAP_RECEIPT_KIND};
use crate::rank::{sort_by_hot_score, RankConfig, TimeRange};
use crate::relay::{Filter, Pool};

/// Default page size.
pub const DEFAULT_PAGE_LIMIT: usize = 20;
/// Sample size for popularity aggregations.
const POPULAR_SAMPLE: usize = 100;
/// How much one zapped sat counts next to one net upvote when ranking
/// authors.
const SATS_ENGAGEMENT_WEIGHT: f64 = 0.1;

/// Current unix timestamp.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// One post with its recomputed engagement metrics.
#[derive(Debug, Clone)]
pub struct FeedItem {
    pub event: Event,
    pub metrics: Metrics,
}

/// A page of feed items plus the `until` cursor for the next page.
#[derive(Debug, Clone)]
pub struct FeedPage {
    pub items: Vec<FeedItem>,
    pub next_cursor: Option<u64>,
}

/// Post count and latest activity for one den.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenStats {
    pub name: String,
    pub post_count: u32,
    pub latest_post: u64,
}

/// Aggregate engagement drawn by one author's recent posts and comments.
#[derive(Debug, Clone, PartialEq)]
pub struct UserStats {
    pub pubkey: String,
    pub post_count: u32,
    pub comment_count: u32,
    pub total_sats: u64,
    pub engagement: f64,
}

/// A zap receipt ranked by amount.
#[derive(Debug, Clone)]
pub struct ZapHighlight {
    pub receipt: Event,
    pub target_id: String,
    pub amount_sats: u64,
}

/// Feed reader over a relay pool, with a short-lived page cache.
pub struct Feeds {
    pool: Pool,
    rank: RankConfig,
    pages: QueryCache<FeedPage>,
}

impl Feeds {
    pub fn new(pool: Pool, rank: RankConfig, cache_ttl: Duration) -> Self {
        Self {
            pool,
            rank,
            pages: QueryCache::new(cache_ttl),
        }
    }

    /// Newest-first posts of one den.
    pub async fn den_feed(&self, den: &str, limit: usize, until: Option<u64>) -> FeedPage {
        let identifier = den_to_identifier(den);
        let filter = Filter::new()
            .kinds([COMMENT_KIND])
            .tag("i", [identifier.as_str()])
            .tag("k", [HASHTAG_KIND])
            .limit(limit);
        self.recent_page("den-feed", filter, limit, until).await
    }

    /// Newest-first posts across every den.
    pub async fn global_feed(&self, limit: usize, until: Option<u64>) -> FeedPage {
        let filter = Filter::new()
            .kinds([COMMENT_KIND])
            .tag("K", [HASHTAG_KIND])
            .limit(limit);
        self.recent_page("global-feed", filter, limit, until).await
    }

    /// Hottest posts within a time range, ordered by decayed score.
    /// The evaluation time is deliberately not part of the cache key; the
    /// TTL already bounds how stale a ranking can get.
    pub async fn popular(&self, range: TimeRange, limit: usize, now: u64) -> FeedPage {
        let key = cache_key(&[format!("{range:?}"), limit.to_string()]);
        if let Some(page) = self.pages.get("popular", &key) {
            return page;
        }

        let mut filter = Filter::new()
            .kinds([COMMENT_KIND])
            .tag("K", [HASHTAG_KIND])
            .limit(POPULAR_SAMPLE);
        if let Some(since) = range.since(now) {
            filter = filter.since(since);
        }
        let posts = top_level_only(self.pool.query(&[filter]).await);
        let items = self.enrich(posts).await;

        let mut scored: Vec<(Event, Metrics)> =
            items.into_iter().map(|i| (i.event, i.metrics)).collect();
        sort_by_hot_score(&mut scored, now, &self.rank);
        scored.truncate(limit);

        let page = FeedPage {
            items: scored
                .into_iter()
                .map(|(event, metrics)| FeedItem { event, metrics })
                .collect(),
            next_cursor: None,
        };
        self.pages.put("popular", &key, page.clone());
        page
    }

    /// Dens ranked by post volume in a recent global sample.
    pub async fn popular_dens(&self, limit: usize) -> Vec<DenStats> {
        let filter = Filter::new()
            .kinds([COMMENT_KIND])
            .tag("K", [HASHTAG_KIND])
            .limit(POPULAR_SAMPLE);
        let posts = top_level_only(self.pool.query(&[filter]).await);

        let mut stats: Vec<DenStats> = Vec::new();
        for event in &posts {
            let Some(den) = event_den(event) else { continue };
            match stats.iter_mut().find(|s| s.name == den) {
                Some(s) => {
                    s.post_count += 1;
                    s.latest_post = s.latest_post.max(event.created_at);
                }
                None => stats.push(DenStats {
                    name: den,
                    post_count: 1,
                    latest_post: event.created_at,
                }),
            }
        }
        stats.sort_by(|a, b| {
            b.post_count
                .cmp(&a.post_count)
                .then_with(|| a.name.cmp(&b.name))
        });
        stats.truncate(limit);
        stats
    }

    /// Authors ranked by the engagement their recent posts and comments
    /// drew. Each event contributes its net vote score plus sats weighted
    /// by [`SATS_ENGAGEMENT_WEIGHT`]; raw decayed hot score plays no role
    /// here.
    pub async fn popular_users(&self, range: TimeRange, limit: usize, now: u64) -> Vec<UserStats> {
        let mut filter = Filter::new()
            .kinds([COMMENT_KIND])
            .tag("K", [HASHTAG_KIND])
            .limit(POPULAR_SAMPLE);
        if let Some(since) = range.since(now) {
            filter = filter.since(since);
        }
        // Comments count toward their author too, so no top-level filter;
        // events outside any valid den are still dropped.
        let sample: Vec<Event> = self
            .pool
            .query(&[filter])
            .await
            .into_iter()
            .filter(|ev| event_den(ev).is_some())
            .collect();
        if sample.is_empty() {
            return Vec::new();
        }

        let ids: Vec<String> = sample.iter().map(|e| e.id.clone()).collect();
        let (votes, zaps) = tokio::join!(
            fetch_batch_votes(&self.pool, &ids),
            fetch_batch_zaps(&self.pool, &ids),
        );

        let mut users: Vec<UserStats> = Vec::new();
        for event in &sample {
            let vote = votes.get(&event.id).copied().unwrap_or_default();
            let zap = zaps.get(&event.id).copied().unwrap_or_default();
            let idx = match users.iter().position(|u| u.pubkey == event.pubkey) {
                Some(idx) => idx,
                None => {
                    users.push(UserStats {
                        pubkey: event.pubkey.clone(),
                        post_count: 0,
                        comment_count: 0,
                        total_sats: 0,
                        engagement: 0.0,
                    });
                    users.len() - 1
                }
            };
            let stats = &mut users[idx];
            if is_top_level_post(event) {
                stats.post_count += 1;
            } else {
                stats.comment_count += 1;
            }
            stats.total_sats += zap.total_sats;
            stats.engagement +=
                zap.total_sats as f64 * SATS_ENGAGEMENT_WEIGHT + vote.score as f64;
        }
        users.sort_by(|a, b| {
            b.engagement
                .partial_cmp(&a.engagement)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.pubkey.cmp(&b.pubkey))
        });
        users.truncate(limit);
        users
    }

    /// Largest zaps on valid posts within a time range.
    pub async fn largest_zaps(
        &self,
        range: TimeRange,
        limit: usize,
        now: u64,
    ) -> Vec<ZapHighlight> {
        let since = range.since(now);
        let mut post_filter = Filter::new()
            .kinds([COMMENT_KIND])
            .tag("K", [HASHTAG_KIND])
            .limit(POPULAR_SAMPLE);
        if let Some(since) = since {
            post_filter = post_filter.since(since);
        }
        let posts = top_level_only(self.pool.query(&[post_filter]).await);
        if posts.is_empty() {
            return Vec::new();
        }

        let post_ids: Vec<String> = posts.iter().map(|p| p.id.clone()).collect();
        let mut zap_filter = Filter::new()
            .kinds([ZAP_RECEIPT_KIND])
            .tag("e", post_ids.iter().cloned())
            .limit(POPULAR_SAMPLE);
        if let Some(since) = since {
            zap_filter = zap_filter.since(since);
        }

        let mut highlights: Vec<ZapHighlight> = self
            .pool
            .query(&[zap_filter])
            .await
            .into_iter()
            .filter_map(|receipt| {
                let target_id = receipt.parent_event_id()?.to_string();
                if !post_ids.iter().any(|id| *id == target_id) {
                    return None;
                }
                let amount_sats = crate::aggregate::extract_zap_amount_sats(&receipt);
                if amount_sats == 0 {
                    return None;
                }
                Some(ZapHighlight {
                    receipt,
                    target_id,
                    amount_sats,
                })
            })
            .collect();
        highlights.sort_by(|a, b| {
            b.amount_sats
                .cmp(&a.amount_sats)
                .then_with(|| a.receipt.id.cmp(&b.receipt.id))
        });
        highlights.truncate(limit);
        highlights
    }

    /// Free-text search, best-effort depending on relay support.
    pub async fn search(&self, term: &str, den: Option<&str>, limit: usize) -> Vec<Event> {
        let mut filter = Filter::new()
            .kinds([COMMENT_KIND])
            .tag("K", [HASHTAG_KIND])
            .search(term)
            .limit(limit);
        if let Some(den) = den {
            filter = filter.tag("I", [den_to_identifier(den)]);
        }
        let mut events = self.pool.query(&[filter]).await;
        events.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        events.truncate(limit);
        events
    }

    /// Drop all cached pages; called after any local mutation succeeds.
    pub fn invalidate(&self) {
        self.pages.clear();
    }

    async fn recent_page(
        &self,
        namespace: &str,
        base: Filter,
        limit: usize,
        until: Option<u64>,
    ) -> FeedPage {
        let mut key_parts: Vec<String> =
            base.tags.iter().map(|(n, v)| format!("{n}={}", v.join(","))).collect();
        key_parts.push(format!("limit={limit}"));
        key_parts.push(format!("until={until:?}"));
        let key = cache_key(&key_parts);
        if let Some(page) = self.pages.get(namespace, &key) {
            return page;
        }

        let filter = match until {
            Some(ts) => base.until(ts),
            None => base,
        };
        let mut posts = top_level_only(self.pool.query(&[filter]).await);
        posts.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        posts.truncate(limit);
        let next_cursor = posts.last().map(|p| p.created_at.saturating_sub(1));

        let page = FeedPage {
            items: self.enrich(posts).await,
            next_cursor,
        };
        self.pages.put(namespace, &key, page.clone());
        page
    }

    /// Attach metrics to a post batch. The three metric fetches go out
    /// before any of them is awaited.
    async fn enrich(&self, posts: Vec<Event>) -> Vec<FeedItem> {
        let ids: Vec<String> = posts.iter().map(|p| p.id.clone()).collect();
        let (votes, zaps, replies) = tokio::join!(
            fetch_batch_votes(&self.pool, &ids),
            fetch_batch_zaps(&self.pool, &ids),
            fetch_batch_reply_counts(&self.pool, &ids),
        );
        posts
            .into_iter()
            .map(|event| {
                let vote = votes.get(&event.id).copied().unwrap_or_default();
                let zap = zaps.get(&event.id).copied().unwrap_or_default();
                let metrics = Metrics {
                    total_sats: zap.total_sats,
                    zap_count: zap.zap_count,
                    upvotes: vote.upvotes,
                    downvotes: vote.downvotes,
                    score: vote.score,
                    reply_count: replies.get(&event.id).copied().unwrap_or(0),
                    created_at: event.created_at,
                };
                FeedItem { event, metrics }
            })
            .collect()
    }
}

fn top_level_only(events: Vec<Event>) -> Vec<Event> {
    events.into_iter().filter(|e| is_top_level_post(e)).collect()
}
