//! Nostr event model and typed tag accessors.

use serde::{Deserialize, Serialize};

/// Kind number for den comments (both top-level posts and replies).
pub const COMMENT_KIND: u32 = 1111;
/// Kind number for reactions (votes).
pub const REACTION_KIND: u32 = 7;
/// Kind number for zap receipts.
pub const ZAP_RECEIPT_KIND: u32 = 9735;
/// Kind number for the follow list (replaceable).
pub const FOLLOW_LIST_KIND: u32 = 3;
/// Kind number for the mute list (replaceable).
pub const MUTE_LIST_KIND: u32 = 10000;
/// Kind number for the den subscription list (replaceable).
pub const DEN_LIST_KIND: u32 = 10073;
/// Context-kind marker carried in `K`/`k` tags of top-level posts.
pub const HASHTAG_KIND: &str = "#";

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and
/// the following elements hold data. The tags foxden reads and writes:
///
/// - `I` – den context identifier, e.g. `#gaming`
/// - `K` – den context kind marker (`#`)
/// - `i` – direct parent identifier (top-level posts point at their own den)
/// - `k` – direct parent kind marker
/// - `E` – root event of a thread: `(id, "", pubkey)`
/// - `e` – direct parent event / reaction target: `(id, ...)`
/// - `p` – referenced author public key
///
/// Each tag is stored verbatim so uncommon or custom tags survive a
/// read-modify-write of a replaceable list untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Build a tag from string-ish parts.
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Tag(parts.into_iter().map(Into::into).collect())
    }

    /// Tag name (first element), if present.
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Tag value (second element), if present.
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }
}

/// Signed event as returned by relays.
///
/// ```json
/// {
///   "id": "aa11",
///   "pubkey": "deadbeef",
///   "kind": 1111,
///   "created_at": 1700000000,
///   "tags": [["I", "#gaming"], ["K", "#"]],
///   "content": "hello",
///   "sig": "deadbeef"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Kind number, e.g. `1111` or `9735`.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Ordered tag list.
    pub tags: Vec<Tag>,
    /// Event content body.
    pub content: String,
    /// Schnorr signature over the event hash.
    pub sig: String,
}

/// Event fields prior to signing; `signer::Signer` turns this into an [`Event`].
#[derive(Debug, Clone)]
pub struct UnsignedEvent {
    pub kind: u32,
    pub created_at: u64,
    pub tags: Vec<Tag>,
    pub content: String,
}

impl Event {
    /// First value of the first tag with the given name.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name() == Some(name))
            .and_then(Tag::value)
    }

    /// All values of tags with the given name.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.tags
            .iter()
            .filter(move |t| t.name() == Some(name))
            .filter_map(Tag::value)
    }

    /// Den context identifier (`I` tag).
    pub fn context_identifier(&self) -> Option<&str> {
        self.tag_value("I")
    }

    /// Den context kind marker (`K` tag).
    pub fn context_kind(&self) -> Option<&str> {
        self.tag_value("K")
    }

    /// Direct parent identifier (`i` tag).
    pub fn direct_parent_identifier(&self) -> Option<&str> {
        self.tag_value("i")
    }

    /// Direct parent kind marker (`k` tag).
    pub fn direct_kind(&self) -> Option<&str> {
        self.tag_value("k")
    }

    /// Direct parent event id (`e` tag). On replies this is the parent
    /// comment; on reactions and zap receipts it is the target.
    pub fn parent_event_id(&self) -> Option<&str> {
        self.tag_value("e")
    }

    /// Root event id of the thread (`E` tag).
    pub fn root_event_id(&self) -> Option<&str> {
        self.tag_value("E")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Event {
        Event {
            id: "aa11".into(),
            pubkey: "p1".into(),
            kind: COMMENT_KIND,
            created_at: 1,
            tags: vec![
                Tag::new(["I", "#gaming"]),
                Tag::new(["K", "#"]),
                Tag::new(["e", "bb22", "", "p2"]),
                Tag::new(["E", "cc33", "", "p3"]),
                Tag::new(["p", "p2"]),
                Tag::new(["p", "p3"]),
            ],
            content: String::new(),
            sig: String::new(),
        }
    }

    #[test]
    fn typed_accessors_read_first_match() {
        let ev = sample();
        assert_eq!(ev.context_identifier(), Some("#gaming"));
        assert_eq!(ev.context_kind(), Some("#"));
        assert_eq!(ev.parent_event_id(), Some("bb22"));
        assert_eq!(ev.root_event_id(), Some("cc33"));
        assert_eq!(ev.direct_parent_identifier(), None);
    }

    #[test]
    fn tag_values_collects_all() {
        let ev = sample();
        let ps: Vec<&str> = ev.tag_values("p").collect();
        assert_eq!(ps, vec!["p2", "p3"]);
    }

    #[test]
    fn empty_and_short_tags_are_harmless() {
        let ev = Event {
            id: "x".into(),
            pubkey: "p".into(),
            kind: REACTION_KIND,
            created_at: 0,
            tags: vec![Tag(vec![]), Tag(vec!["e".into()])],
            content: "+".into(),
            sig: String::new(),
        };
        assert_eq!(ev.parent_event_id(), None);
    }

    #[test]
    fn serde_round_trip() {
        let ev = sample();
        let json = serde_json::to_string(&ev).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(ev, back);
    }
}
