use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::error::RedisError;

/// Composite stream entry ID, `ms-seq`, ordered first by milliseconds
/// then by sequence number within the same millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId {
    pub ms: u64,
    pub seq: u64,
}

impl EntryId {
    pub const MIN: EntryId = EntryId { ms: 0, seq: 0 };
    pub const MAX: EntryId = EntryId { ms: u64::MAX, seq: u64::MAX };

    pub fn is_zero(&self) -> bool {
        self.ms == 0 && self.seq == 0
    }
}

impl Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = RedisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('-') {
            Some((ms, seq)) => {
                let ms = ms
                    .parse()
                    .map_err(|_| RedisError::semantic("Invalid stream ID specified as stream command argument"))?;
                let seq = seq
                    .parse()
                    .map_err(|_| RedisError::semantic("Invalid stream ID specified as stream command argument"))?;
                Ok(EntryId { ms, seq })
            }
            None => {
                let ms = s
                    .parse()
                    .map_err(|_| RedisError::semantic("Invalid stream ID specified as stream command argument"))?;
                Ok(EntryId { ms, seq: 0 })
            }
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

pub type Fields = Vec<(Bytes, Bytes)>;

struct Stream {
    latest: EntryId,
    // ordered ms -> (ordered seq -> fields); gives O(log n) range lookups
    // by ID prefix, per the spec's literal "two-level ordered index" wording.
    entries: BTreeMap<u64, BTreeMap<u64, Fields>>,
}

impl Stream {
    fn new() -> Self {
        Self {
            latest: EntryId::MIN,
            entries: BTreeMap::new(),
        }
    }

    fn insert(&mut self, id: EntryId, fields: Fields) {
        self.entries.entry(id.ms).or_default().insert(id.seq, fields);
        self.latest = id;
    }

    fn range(&self, start: EntryId, end: EntryId) -> Vec<(EntryId, Fields)> {
        self.entries
            .range(start.ms..=end.ms)
            .flat_map(|(&ms, by_seq)| {
                let lo = if ms == start.ms { start.seq } else { 0 };
                let hi = if ms == end.ms { end.seq } else { u64::MAX };
                by_seq
                    .range(lo..=hi)
                    .map(move |(&seq, fields)| (EntryId { ms, seq }, fields.clone()))
            })
            .collect()
    }

    fn after(&self, id: EntryId) -> Vec<(EntryId, Fields)> {
        if id == EntryId::MAX {
            return Vec::new();
        }
        let next = EntryId {
            ms: id.ms,
            seq: id.seq.saturating_add(1),
        };
        self.range(next, EntryId::MAX)
    }
}

/// Stream keyspace: one ordered, append-only entry index per stream name.
#[derive(Default)]
pub struct StreamStore {
    streams: RwLock<std::collections::HashMap<Bytes, Stream>>,
}

/// The three ID forms XADD accepts: fully explicit, auto-sequence within
/// an explicit millisecond, or fully automatic.
pub enum IdSpec {
    Explicit(EntryId),
    AutoSeq(u64),
    Auto,
}

impl FromStr for IdSpec {
    type Err = RedisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" {
            return Ok(IdSpec::Auto);
        }
        match s.split_once('-') {
            Some((ms, "*")) => {
                let ms = ms
                    .parse()
                    .map_err(|_| RedisError::semantic("Invalid stream ID specified as stream command argument"))?;
                Ok(IdSpec::AutoSeq(ms))
            }
            _ => Ok(IdSpec::Explicit(s.parse()?)),
        }
    }
}

impl StreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exists(&self, name: &[u8]) -> bool {
        self.streams.read().unwrap().contains_key(name)
    }

    pub fn latest_id(&self, name: &[u8]) -> EntryId {
        self.streams
            .read()
            .unwrap()
            .get(name)
            .map(|s| s.latest)
            .unwrap_or(EntryId::MIN)
    }

    /// Resolves an `IdSpec` against the stream's current state and, if
    /// valid, inserts the entry. Returns the resolved ID.
    pub fn add(&self, name: &[u8], spec: IdSpec, fields: Fields) -> Result<EntryId, RedisError> {
        let mut streams = self.streams.write().unwrap();
        let stream = streams.entry(Bytes::copy_from_slice(name)).or_insert_with(Stream::new);

        let id = match spec {
            IdSpec::Auto => EntryId { ms: now_ms(), seq: 0 },
            IdSpec::AutoSeq(ms) => {
                let seq = match stream.entries.get(&ms).and_then(|by_seq| by_seq.keys().next_back()) {
                    Some(&max_seq) => max_seq + 1,
                    None if ms == 0 => 1,
                    None => 0,
                };
                EntryId { ms, seq }
            }
            IdSpec::Explicit(id) => id,
        };

        if id.is_zero() {
            return Err(RedisError::semantic("The ID specified in XADD must be greater than 0-0"));
        }
        if id <= stream.latest && (stream.latest != EntryId::MIN || !stream.entries.is_empty()) {
            return Err(RedisError::semantic(
                "The ID specified in XADD is equal or smaller than the target stream top item",
            ));
        }

        stream.insert(id, fields);
        Ok(id)
    }

    pub fn range(&self, name: &[u8], start: EntryId, end: EntryId) -> Vec<(EntryId, Fields)> {
        self.streams
            .read()
            .unwrap()
            .get(name)
            .map(|s| s.range(start, end))
            .unwrap_or_default()
    }

    pub fn after(&self, name: &[u8], id: EntryId) -> Vec<(EntryId, Fields)> {
        self.streams
            .read()
            .unwrap()
            .get(name)
            .map(|s| s.after(id))
            .unwrap_or_default()
    }
}

/// Parses an XRANGE endpoint: `-`/`+` for min/max, a bare ms (expanded to
/// `ms-0` for start / `ms-MAX` for end), or a full `ms-seq` pair.
pub fn parse_range_endpoint(s: &str, is_start: bool) -> Result<EntryId, RedisError> {
    match s {
        "-" => Ok(EntryId::MIN),
        "+" => Ok(EntryId::MAX),
        s if !s.contains('-') => {
            let ms: u64 = s
                .parse()
                .map_err(|_| RedisError::semantic("Invalid stream ID specified as stream command argument"))?;
            Ok(EntryId {
                ms,
                seq: if is_start { 0 } else { u64::MAX },
            })
        }
        s => s.parse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_ids_must_strictly_increase() {
        let store = StreamStore::new();
        assert_eq!(store.add(b"s", "1-1".parse().unwrap(), vec![]).unwrap(), EntryId { ms: 1, seq: 1 });
        let err = store.add(b"s", "1-1".parse().unwrap(), vec![]).unwrap_err();
        assert!(matches!(err, RedisError::Semantic(_)));
    }

    #[test]
    fn zero_zero_is_rejected() {
        let store = StreamStore::new();
        let err = store.add(b"s", "0-0".parse().unwrap(), vec![]).unwrap_err();
        assert!(matches!(err, RedisError::Semantic(_)));
    }

    #[test]
    fn auto_seq_increments_within_same_millisecond() {
        let store = StreamStore::new();
        let first = store.add(b"s", "5-*".parse().unwrap(), vec![]).unwrap();
        let second = store.add(b"s", "5-*".parse().unwrap(), vec![]).unwrap();
        assert_eq!(first, EntryId { ms: 5, seq: 0 });
        assert_eq!(second, EntryId { ms: 5, seq: 1 });
    }

    #[test]
    fn auto_seq_at_ms_zero_starts_at_one() {
        let store = StreamStore::new();
        let first = store.add(b"s", "0-*".parse().unwrap(), vec![]).unwrap();
        assert_eq!(first, EntryId { ms: 0, seq: 1 });
    }

    #[test]
    fn range_is_inclusive_and_ordered() {
        let store = StreamStore::new();
        store.add(b"s", "1-1".parse().unwrap(), vec![(Bytes::from("f"), Bytes::from("1"))]).unwrap();
        store.add(b"s", "2-1".parse().unwrap(), vec![(Bytes::from("f"), Bytes::from("2"))]).unwrap();
        store.add(b"s", "3-1".parse().unwrap(), vec![(Bytes::from("f"), Bytes::from("3"))]).unwrap();
        let results = store.range(b"s", EntryId::MIN, EntryId::MAX);
        let ids: Vec<_> = results.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![
            EntryId { ms: 1, seq: 1 },
            EntryId { ms: 2, seq: 1 },
            EntryId { ms: 3, seq: 1 },
        ]);
    }

    #[test]
    fn after_excludes_the_given_id() {
        let store = StreamStore::new();
        store.add(b"s", "1-1".parse().unwrap(), vec![]).unwrap();
        store.add(b"s", "1-2".parse().unwrap(), vec![]).unwrap();
        let results = store.after(b"s", EntryId { ms: 1, seq: 1 });
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, EntryId { ms: 1, seq: 2 });
    }
}
