//! Time-decayed popularity scoring.

use std::cmp::Ordering;

use crate::aggregate::Metrics;
use crate::event::Event;

/// Seconds per time-range bucket.
const DAY_SECS: u64 = 86_400;

/// Ranking constants. The exact weights are a tuning choice, not a
/// structural contract, so they are configurable rather than hard-coded;
/// the defaults favour fresh posts the way "hot" feeds conventionally do.
#[derive(Debug, Clone, Copy)]
pub struct RankConfig {
    /// Exponent applied to the age term; larger means faster decay.
    pub gravity: f64,
    /// Hours added to the age before decay, so brand-new posts don't
    /// divide by near-zero.
    pub age_offset_hours: f64,
    /// Weight of each reply relative to one net upvote.
    pub reply_weight: f64,
    /// Weight of `ln(1 + sats)` relative to one net upvote.
    pub zap_weight: f64,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            gravity: 1.8,
            age_offset_hours: 2.0,
            reply_weight: 2.0,
            zap_weight: 3.0,
        }
    }
}

/// Hot score at evaluation time `now`.
///
/// Engagement (net vote score, replies, log-dampened sats) is divided by a
/// power of the post's age, so a fresh lightly-engaged post can outrank an
/// old heavily-engaged one. Strictly increasing in votes, replies, and
/// sats; strictly decreasing in age. A negative numerator is decayed
/// multiplicatively instead of divided, otherwise aging would wash the
/// penalty out and lift downvoted posts back up the ranking.
pub fn hot_score(metrics: &Metrics, now: u64, cfg: &RankConfig) -> f64 {
    let engagement = metrics.score as f64
        + cfg.reply_weight * f64::from(metrics.reply_count)
        + cfg.zap_weight * (1.0 + metrics.total_sats as f64).ln();
    let age_hours = now.saturating_sub(metrics.created_at) as f64 / 3600.0;
    let decay = (age_hours + cfg.age_offset_hours).powf(cfg.gravity);
    let numerator = engagement + 1.0;
    if numerator >= 0.0 {
        numerator / decay
    } else {
        numerator * decay
    }
}

/// Sort (event, metrics) pairs hottest-first. Equal scores are ordered by
/// ascending event id so repeated sorts of the same input are identical.
pub fn sort_by_hot_score(posts: &mut [(Event, Metrics)], now: u64, cfg: &RankConfig) {
    posts.sort_by(|(a_ev, a_m), (b_ev, b_m)| {
        let a_score = hot_score(a_m, now, cfg);
        let b_score = hot_score(b_m, now, cfg);
        b_score
            .partial_cmp(&a_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a_ev.id.cmp(&b_ev.id))
    });
}

/// Feed time window; only affects query construction, never scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TimeRange {
    Day,
    Week,
    Month,
    Year,
    All,
}

impl TimeRange {
    /// `since` cutoff for a query issued at `now`, or `None` for all time.
    pub fn since(&self, now: u64) -> Option<u64> {
        let window = match self {
            TimeRange::Day => DAY_SECS,
            TimeRange::Week => 7 * DAY_SECS,
            TimeRange::Month => 30 * DAY_SECS,
            TimeRange::Year => 365 * DAY_SECS,
            TimeRange::All => return None,
        };
        Some(now.saturating_sub(window))
    }
}
