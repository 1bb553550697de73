use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use regex::Regex;

use crate::error::RedisError;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

struct ValueRecord {
    payload: Bytes,
    expires_at_ms: Option<u64>,
}

impl ValueRecord {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at_ms.map(|e| now >= e).unwrap_or(false)
    }
}

/// String keyspace with optional per-key TTL. Expiry is lazy: an expired
/// key is only actually removed the next time it's looked up, matching
/// the lazy-delete-on-read semantics the component design calls for.
#[derive(Default)]
pub struct ValueStore {
    entries: RwLock<HashMap<Bytes, ValueRecord>>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: Bytes, value: Bytes, ttl_ms: Option<u64>) {
        let expires_at_ms = ttl_ms.map(|ttl| now_ms() + ttl);
        self.entries.write().unwrap().insert(
            key,
            ValueRecord {
                payload: value,
                expires_at_ms,
            },
        );
    }

    /// Used only by RDB ingestion, which already has an absolute expiry
    /// timestamp (milliseconds since epoch) rather than a relative TTL.
    pub fn load_entry(&self, key: Bytes, value: Bytes, expires_at_ms: Option<u64>) {
        self.entries.write().unwrap().insert(
            key,
            ValueRecord {
                payload: value,
                expires_at_ms,
            },
        );
    }

    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let now = now_ms();
        let mut entries = self.entries.write().unwrap();
        match entries.get(key) {
            Some(record) if record.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(record) => Some(record.payload.clone()),
            None => None,
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    pub fn incr(&self, key: Bytes) -> Result<i64, RedisError> {
        let now = now_ms();
        let mut entries = self.entries.write().unwrap();
        let current: i64 = match entries.get(&key) {
            Some(record) if !record.is_expired(now) => std::str::from_utf8(&record.payload)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| RedisError::semantic("value is not an integer or out of range"))?,
            _ => 0,
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| RedisError::semantic("value is not an integer or out of range"))?;
        entries.insert(
            key,
            ValueRecord {
                payload: Bytes::from(next.to_string()),
                expires_at_ms: None,
            },
        );
        Ok(next)
    }

    /// `"string"` or `"none"`; callers layer stream/list lookups in to get
    /// the full TYPE answer (see the dispatcher's `handle_type`).
    pub fn type_of(&self, key: &[u8]) -> Option<&'static str> {
        self.contains(key).then_some("string")
    }

    pub fn keys_matching(&self, pattern: &str) -> Vec<Bytes> {
        let regex = match glob_to_regex(pattern) {
            Some(r) => r,
            None => return Vec::new(),
        };
        let now = now_ms();
        self.entries
            .read()
            .unwrap()
            .iter()
            .filter(|(_, record)| !record.is_expired(now))
            .filter(|(key, _)| std::str::from_utf8(key).map(|s| regex.is_match(s)).unwrap_or(false))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

/// Translates a Redis-style glob (`*`, `?`, literal-otherwise) into a
/// regex. Any other metacharacter is escaped rather than interpreted.
/// An unparseable pattern yields `None`, which callers treat as "matches
/// nothing" rather than a protocol error.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::with_capacity(pattern.len() * 2 + 2);
    re.push('^');
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c if regex::escape(&c.to_string()) != c.to_string() => {
                re.push_str(&regex::escape(&c.to_string()))
            }
            c => re.push(c),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let store = ValueStore::new();
        store.set(Bytes::from("foo"), Bytes::from("bar"), None);
        assert_eq!(store.get(b"foo"), Some(Bytes::from("bar")));
    }

    #[test]
    fn expired_key_reads_as_absent() {
        let store = ValueStore::new();
        store.set(Bytes::from("foo"), Bytes::from("bar"), Some(0));
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(store.get(b"foo"), None);
    }

    #[test]
    fn incr_on_absent_key_starts_at_one() {
        let store = ValueStore::new();
        assert_eq!(store.incr(Bytes::from("c")).unwrap(), 1);
        assert_eq!(store.incr(Bytes::from("c")).unwrap(), 2);
    }

    #[test]
    fn incr_on_non_numeric_value_is_an_error() {
        let store = ValueStore::new();
        store.set(Bytes::from("c"), Bytes::from("nope"), None);
        assert!(store.incr(Bytes::from("c")).is_err());
    }

    #[test]
    fn keys_matching_supports_star_glob() {
        let store = ValueStore::new();
        store.set(Bytes::from("foo_1"), Bytes::from("a"), None);
        store.set(Bytes::from("foo_2"), Bytes::from("b"), None);
        store.set(Bytes::from("bar"), Bytes::from("c"), None);
        let mut matched = store.keys_matching("foo_*");
        matched.sort();
        assert_eq!(matched, vec![Bytes::from("foo_1"), Bytes::from("foo_2")]);
    }

    #[test]
    fn invalid_glob_matches_nothing_not_an_error() {
        let store = ValueStore::new();
        store.set(Bytes::from("foo"), Bytes::from("a"), None);
        // an unterminated bracket class is not a valid regex once translated
        assert_eq!(store.keys_matching("[unterminated"), Vec::<Bytes>::new());
    }
}
