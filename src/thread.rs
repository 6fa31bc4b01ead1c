//! Level-by-level reply tree assembly.
//!
//! Replies are fetched breadth-first: the ids discovered at each level
//! become the parent filter for the next. A seen-set keeps duplicate
//! delivery (the same event returned at two levels, or by two relays) from
//! inflating counts or looping, and the level bound caps relay round trips;
//! true reply depth is unbounded, deeper subtrees are reached by pivoting a
//! new fetch onto their root.

use std::collections::{HashMap, HashSet};

use crate::den::den_to_identifier;
use crate::event::{Event, COMMENT_KIND};
use crate::relay::{Filter, Pool};

/// Levels fetched per thread view before handing off to a pivot.
pub const DEFAULT_MAX_DEPTH: usize = 6;

/// Per-level result cap.
const LEVEL_LIMIT: usize = 500;

/// Assembled reply tree for one thread.
#[derive(Debug, Default)]
pub struct Thread {
    replies: Vec<Event>,
    /// Parent id -> direct children, oldest first.
    children: HashMap<String, Vec<Event>>,
    /// Events of the deepest fetched level.
    last_level: Vec<Event>,
}

impl Thread {
    /// Total number of unique replies discovered.
    pub fn reply_count(&self) -> usize {
        self.replies.len()
    }

    /// All discovered replies in fetch order.
    pub fn all_replies(&self) -> &[Event] {
        &self.replies
    }

    /// Direct children of a node, sorted by `created_at` ascending (ties by
    /// id) for stable comment ordering.
    pub fn direct_replies(&self, parent_id: &str) -> &[Event] {
        self.children.get(parent_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether the deepest fetched level contains children of this node,
    /// i.e. the rendering boundary should offer "continue thread" instead
    /// of silently truncating.
    pub fn has_deeper_replies(&self, node_id: &str) -> bool {
        self.last_level
            .iter()
            .any(|ev| ev.parent_event_id() == Some(node_id))
    }

    fn build(replies: Vec<Event>, last_level: Vec<Event>) -> Self {
        let mut children: HashMap<String, Vec<Event>> = HashMap::new();
        for reply in &replies {
            if let Some(parent) = reply.parent_event_id() {
                children.entry(parent.to_string()).or_default().push(reply.clone());
            }
        }
        for siblings in children.values_mut() {
            siblings.sort_by(|a, b| {
                a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
            });
        }
        Self {
            replies,
            children,
            last_level,
        }
    }
}

/// Fetch the reply tree beneath `root_id` in a den, at most `max_depth`
/// levels deep. A level that fails to fetch truncates the tree there;
/// partial trees are valid.
pub async fn fetch_thread(pool: &Pool, den: &str, root_id: &str, max_depth: usize) -> Thread {
    let identifier = den_to_identifier(den);
    let base = Filter::new()
        .kinds([COMMENT_KIND])
        .tag("I", [identifier.as_str()])
        .tag("k", ["1111"]);

    let mut seen: HashSet<String> = HashSet::new();
    let mut frontier = vec![root_id.to_string()];
    let mut replies = Vec::new();
    let mut last_level = Vec::new();

    for _ in 0..max_depth {
        if frontier.is_empty() {
            break;
        }
        let filter = base
            .clone()
            .tag("e", frontier.iter().cloned())
            .limit(LEVEL_LIMIT);
        let events = pool.query(&[filter]).await;
        let new_events: Vec<Event> = events
            .into_iter()
            .filter(|ev| seen.insert(ev.id.clone()))
            .collect();
        if new_events.is_empty() {
            break;
        }
        frontier = new_events.iter().map(|ev| ev.id.clone()).collect();
        last_level = new_events.clone();
        replies.extend(new_events);
    }

    Thread::build(replies, last_level)
}
