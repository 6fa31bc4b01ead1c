//! Vote and zap aggregation.
//!
//! Reactions follow latest-per-author-wins: when one pubkey has voted on the
//! same target more than once, only the newest reaction counts. Zap receipts
//! are never deduplicated since each one is an independent payment.

use std::collections::HashMap;

use serde_json::Value;

use crate::event::{Event, COMMENT_KIND, REACTION_KIND, ZAP_RECEIPT_KIND};
use crate::relay::{Filter, Pool};

/// Per-relay result cap for metric queries.
const METRIC_LIMIT: usize = 500;

/// Up/down counts for one target after deduplication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoteTally {
    pub upvotes: u32,
    pub downvotes: u32,
    pub score: i64,
}

/// Zap count and total amount in sats for one target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZapTally {
    pub zap_count: u32,
    pub total_sats: u64,
}

/// Engagement metrics for a single post, recomputed on every fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metrics {
    pub total_sats: u64,
    pub zap_count: u32,
    pub upvotes: u32,
    pub downvotes: u32,
    pub score: i64,
    pub reply_count: u32,
    pub created_at: u64,
}

/// Keep only the newest reaction per author. Ties on `created_at` go to the
/// lexicographically greater id so the result is independent of input order.
pub fn deduplicate_reactions(reactions: &[Event]) -> Vec<Event> {
    let mut latest_by_pubkey: HashMap<&str, &Event> = HashMap::new();
    for reaction in reactions {
        match latest_by_pubkey.get(reaction.pubkey.as_str()) {
            Some(existing)
                if (existing.created_at, existing.id.as_str())
                    >= (reaction.created_at, reaction.id.as_str()) => {}
            _ => {
                latest_by_pubkey.insert(&reaction.pubkey, reaction);
            }
        }
    }
    latest_by_pubkey.into_values().cloned().collect()
}

/// Tally already-deduplicated reactions. `"+"` and empty content are
/// upvotes, `"-"` is a downvote, anything else counts for neither side.
pub fn count_votes(reactions: &[Event]) -> VoteTally {
    let mut tally = VoteTally::default();
    for reaction in reactions {
        match reaction.content.trim() {
            "+" | "" => tally.upvotes += 1,
            "-" => tally.downvotes += 1,
            _ => {}
        }
    }
    tally.score = i64::from(tally.upvotes) - i64::from(tally.downvotes);
    tally
}

/// Deduplicate and tally reactions for a single target.
pub fn aggregate_votes(reactions: &[Event]) -> VoteTally {
    count_votes(&deduplicate_reactions(reactions))
}

/// Group a flat reaction list by target and tally each group independently.
/// Every requested target appears in the result, zeroed when it drew no
/// reactions; reactions naming unknown targets are dropped.
pub fn batch_aggregate_votes(targets: &[String], reactions: &[Event]) -> HashMap<String, VoteTally> {
    let mut by_target: HashMap<&str, Vec<Event>> = HashMap::new();
    for reaction in reactions {
        if let Some(target) = reaction.parent_event_id() {
            if targets.iter().any(|t| t == target) {
                by_target.entry(target).or_default().push(reaction.clone());
            }
        }
    }
    targets
        .iter()
        .map(|id| {
            let tally = by_target
                .get(id.as_str())
                .map(|group| aggregate_votes(group))
                .unwrap_or_default();
            (id.clone(), tally)
        })
        .collect()
}

/// Extract the zap amount in sats from a receipt.
///
/// Tries, in order: the `amount` tag (millisats), the `bolt11` invoice HRP,
/// and the `amount` tag inside the JSON `description`. The first parse that
/// succeeds wins; a receipt with no recoverable amount is worth 0.
pub fn extract_zap_amount_sats(receipt: &Event) -> u64 {
    if let Some(msats) = receipt.tag_value("amount").and_then(|v| v.parse::<u64>().ok()) {
        return msats / 1000;
    }
    if let Some(msats) = receipt.tag_value("bolt11").and_then(parse_bolt11_msats) {
        return msats / 1000;
    }
    if let Some(msats) = receipt.tag_value("description").and_then(description_amount_msats) {
        return msats / 1000;
    }
    0
}

/// Millisat amount from a bolt11 invoice's human-readable part.
///
/// The HRP is `ln` + currency prefix + amount + optional multiplier, e.g.
/// `lnbc5u` is 5 micro-BTC. One BTC is 10^11 millisats.
fn parse_bolt11_msats(invoice: &str) -> Option<u64> {
    let invoice = invoice.to_lowercase();
    let hrp = &invoice[..invoice.rfind('1')?];
    if !hrp.starts_with("ln") {
        return None;
    }
    let digits_start = hrp.find(|c: char| c.is_ascii_digit())?;
    let amount_part = &hrp[digits_start..];
    let (number, multiplier) = match amount_part.chars().last()? {
        'm' | 'u' | 'n' | 'p' => {
            let c = amount_part.chars().last()?;
            (&amount_part[..amount_part.len() - 1], Some(c))
        }
        _ => (amount_part, None),
    };
    let amount: u64 = number.parse().ok()?;
    match multiplier {
        None => amount.checked_mul(100_000_000_000),
        Some('m') => amount.checked_mul(100_000_000),
        Some('u') => amount.checked_mul(100_000),
        Some('n') => amount.checked_mul(100),
        // Pico amounts below one millisat do not round-trip.
        Some('p') => (amount % 10 == 0).then(|| amount / 10),
        Some(_) => None,
    }
}

/// Millisat amount from the `amount` tag of the embedded zap-request JSON.
fn description_amount_msats(description: &str) -> Option<u64> {
    let val: Value = serde_json::from_str(description).ok()?;
    let tags = val.get("tags")?.as_array()?;
    for tag in tags {
        let arr = tag.as_array()?;
        if arr.first()?.as_str()? == "amount" {
            return arr.get(1)?.as_str()?.parse().ok();
        }
    }
    None
}

/// Count and sum receipts for one target. No deduplication.
pub fn aggregate_zaps(receipts: &[Event]) -> ZapTally {
    let mut tally = ZapTally::default();
    for receipt in receipts {
        let sats = extract_zap_amount_sats(receipt);
        if sats > 0 {
            tally.zap_count += 1;
            tally.total_sats += sats;
        }
    }
    tally
}

/// Group receipts by target and tally each group.
pub fn batch_aggregate_zaps(targets: &[String], receipts: &[Event]) -> HashMap<String, ZapTally> {
    let mut result: HashMap<String, ZapTally> =
        targets.iter().map(|id| (id.clone(), ZapTally::default())).collect();
    for receipt in receipts {
        let Some(target) = receipt.parent_event_id() else {
            continue;
        };
        let Some(tally) = result.get_mut(target) else {
            continue;
        };
        let sats = extract_zap_amount_sats(receipt);
        if sats > 0 {
            tally.zap_count += 1;
            tally.total_sats += sats;
        }
    }
    result
}

/// Fetch and tally reactions for a single post.
pub async fn fetch_votes(pool: &Pool, target: &str) -> VoteTally {
    let filter = Filter::new()
        .kinds([REACTION_KIND])
        .tag("e", [target])
        .limit(METRIC_LIMIT);
    aggregate_votes(&pool.query(&[filter]).await)
}

/// Fetch reactions for many posts in one round trip and tally per target.
pub async fn fetch_batch_votes(pool: &Pool, targets: &[String]) -> HashMap<String, VoteTally> {
    if targets.is_empty() {
        return HashMap::new();
    }
    let filter = Filter::new()
        .kinds([REACTION_KIND])
        .tag("e", targets.iter().cloned())
        .limit(METRIC_LIMIT);
    batch_aggregate_votes(targets, &pool.query(&[filter]).await)
}

/// Fetch zap receipts for many posts in one round trip and tally per target.
pub async fn fetch_batch_zaps(pool: &Pool, targets: &[String]) -> HashMap<String, ZapTally> {
    if targets.is_empty() {
        return HashMap::new();
    }
    let filter = Filter::new()
        .kinds([ZAP_RECEIPT_KIND])
        .tag("e", targets.iter().cloned())
        .limit(METRIC_LIMIT);
    batch_aggregate_zaps(targets, &pool.query(&[filter]).await)
}

/// Fetch direct reply counts for many posts in one round trip.
pub async fn fetch_batch_reply_counts(pool: &Pool, targets: &[String]) -> HashMap<String, u32> {
    let mut counts: HashMap<String, u32> =
        targets.iter().map(|id| (id.clone(), 0)).collect();
    if targets.is_empty() {
        return counts;
    }
    let filter = Filter::new()
        .kinds([COMMENT_KIND])
        .tag("k", ["1111"])
        .tag("e", targets.iter().cloned())
        .limit(METRIC_LIMIT);
    for reply in pool.query(&[filter]).await {
        if let Some(parent) = reply.parent_event_id() {
            if let Some(count) = counts.get_mut(parent) {
                *count += 1;
            }
        }
    }
    counts
}
