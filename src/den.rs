//! Den identifier codec and post classification.
//!
//! Dens map to hashtag identifiers: the den `gaming` lives under the
//! identifier `#gaming`. A legacy fully-qualified URL form
//! (`https://host/d/gaming`) still exists in old events and must parse on
//! read, but everything foxden writes uses the bare hashtag form.

use url::Url;

use crate::event::{Event, Tag, COMMENT_KIND, HASHTAG_KIND};

/// Convert a den name to its canonical hashtag identifier. Pure and total:
/// the name is lowercased, a leading `#` typed by the user is dropped so it
/// is not doubled, and validation happens on the read side.
pub fn den_to_identifier(den: &str) -> String {
    format!("#{}", den.trim_start_matches('#').to_lowercase())
}

/// Extract the den name from an identifier, accepting both the canonical
/// hashtag form and the legacy URL form. Returns `None` for malformed input.
pub fn identifier_to_den(identifier: &str) -> Option<String> {
    let raw = if let Some(rest) = identifier.strip_prefix('#') {
        rest.to_lowercase()
    } else {
        url_identifier_den(identifier)?
    };
    if !raw.is_empty() && raw.bytes().all(valid_den_byte) {
        Some(raw)
    } else {
        None
    }
}

/// Whether a string is a well-formed den identifier in either form.
pub fn is_den_identifier(identifier: &str) -> bool {
    identifier_to_den(identifier).is_some()
}

/// Den name from the last path segment after `/d/` of a URL identifier.
fn url_identifier_den(identifier: &str) -> Option<String> {
    let url = Url::parse(identifier).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let mut segments = url.path_segments()?;
    if segments.next()? != "d" {
        return None;
    }
    let den = segments.next()?;
    if segments.next().is_some() {
        return None;
    }
    Some(den.to_lowercase())
}

fn valid_den_byte(b: u8) -> bool {
    b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-'
}

/// Den an event belongs to, via its `I` tag.
pub fn event_den(event: &Event) -> Option<String> {
    identifier_to_den(event.context_identifier()?)
}

/// Whether a comment is a top-level post rather than a reply.
///
/// There is no separate post kind: a post is a comment whose direct-parent
/// tags point back at its own den context, i.e. `I == i` and `K == k`.
pub fn is_top_level_post(event: &Event) -> bool {
    event.kind == COMMENT_KIND
        && event.context_identifier().is_some()
        && event.context_identifier() == event.direct_parent_identifier()
        && event.context_kind().is_some()
        && event.context_kind() == event.direct_kind()
}

/// Tags for a new top-level post in a den.
pub fn post_tags(den: &str) -> Vec<Tag> {
    let identifier = den_to_identifier(den);
    vec![
        Tag::new(["I", identifier.as_str()]),
        Tag::new(["K", HASHTAG_KIND]),
        Tag::new(["i", identifier.as_str()]),
        Tag::new(["k", HASHTAG_KIND]),
    ]
}

/// Tags for a reply to `parent` in the thread rooted at `root`.
///
/// `E` names the thread root, `e` the direct parent; the parent author is
/// notified via `p`, and the root author too when different. Passing the
/// root itself as both arguments produces a first-level reply.
pub fn reply_tags(den: &str, parent: &Event, root: &Event) -> Vec<Tag> {
    let identifier = den_to_identifier(den);
    let mut tags = vec![
        Tag::new(["I", identifier.as_str()]),
        Tag::new(["K", HASHTAG_KIND]),
        Tag::new(["E", root.id.as_str(), "", root.pubkey.as_str()]),
        Tag::new(["e", parent.id.as_str(), "", parent.pubkey.as_str()]),
        Tag::new(["k", "1111"]),
        Tag::new(["p", parent.pubkey.as_str()]),
    ];
    if root.pubkey != parent.pubkey {
        tags.push(Tag::new(["p", root.pubkey.as_str()]));
    }
    tags
}

/// Tag for an up or down vote on a target event.
pub fn reaction_tags(target_id: &str) -> Vec<Tag> {
    vec![Tag::new(["e", target_id])]
}
