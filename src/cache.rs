//! Short-lived result cache for read-heavy aggregates.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha1::{Digest, Sha1};

/// Order-independent cache key over a set of request parameters: the parts
/// are sorted before hashing so two logically-identical requests built in
/// different enumeration order share an entry.
pub fn cache_key(parts: &[String]) -> String {
    let mut sorted: Vec<&str> = parts.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let mut hasher = Sha1::new();
    for part in sorted {
        hasher.update(part.as_bytes());
        hasher.update([0]);
    }
    hex::encode(hasher.finalize())
}

/// TTL cache keyed by `(namespace, key)`. Mutations invalidate a whole
/// namespace synchronously, before the caller observes success.
pub struct QueryCache<T> {
    ttl: Duration,
    entries: Mutex<HashMap<(String, String), (Instant, T)>>,
}

impl<T: Clone> QueryCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<T> {
        let entries = self.entries.lock().unwrap();
        let (stored_at, value) = entries.get(&(namespace.to_string(), key.to_string()))?;
        if stored_at.elapsed() < self.ttl {
            Some(value.clone())
        } else {
            None
        }
    }

    pub fn put(&self, namespace: &str, key: &str, value: T) {
        self.entries
            .lock()
            .unwrap()
            .insert((namespace.to_string(), key.to_string()), (Instant::now(), value));
    }

    /// Drop every entry in a namespace.
    pub fn invalidate(&self, namespace: &str) {
        self.entries
            .lock()
            .unwrap()
            .retain(|(ns, _), _| ns != namespace);
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}
