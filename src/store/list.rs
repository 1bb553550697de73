use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use bytes::Bytes;

use crate::waiter::WaiterRegistry;

/// List keyspace: one double-ended byte sequence per key, plus the
/// waiter registry BLPOP registers against. A list persists even once
/// emptied by pops (observable via `LLEN`) — created on first push, never
/// implicitly removed.
pub struct ListStore {
    lists: RwLock<HashMap<Bytes, VecDeque<Bytes>>>,
    waiters: Arc<WaiterRegistry<Bytes, ()>>,
}

impl Default for ListStore {
    fn default() -> Self {
        Self {
            lists: RwLock::new(HashMap::new()),
            waiters: Arc::new(WaiterRegistry::new()),
        }
    }
}

impl ListStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waiters(&self) -> &Arc<WaiterRegistry<Bytes, ()>> {
        &self.waiters
    }

    /// Pushes `values` onto the front of `key`, creating the list if
    /// absent, and wakes one blocking waiter per element pushed.
    pub fn push_left(&self, key: &[u8], values: impl IntoIterator<Item = Bytes>) -> usize {
        let key = Bytes::copy_from_slice(key);
        let mut pushed = 0usize;
        let len = {
            let mut lists = self.lists.write().unwrap();
            let list = lists.entry(key.clone()).or_default();
            for v in values {
                list.push_front(v);
                pushed += 1;
            }
            list.len()
        };
        self.waiters.notify_count(&key, pushed);
        len
    }

    pub fn push_right(&self, key: &[u8], values: impl IntoIterator<Item = Bytes>) -> usize {
        let key = Bytes::copy_from_slice(key);
        let mut pushed = 0usize;
        let len = {
            let mut lists = self.lists.write().unwrap();
            let list = lists.entry(key.clone()).or_default();
            for v in values {
                list.push_back(v);
                pushed += 1;
            }
            list.len()
        };
        self.waiters.notify_count(&key, pushed);
        len
    }

    pub fn pop_left(&self, key: &[u8], count: usize) -> Vec<Bytes> {
        let mut lists = self.lists.write().unwrap();
        match lists.get_mut(key) {
            Some(list) => (0..count).filter_map(|_| list.pop_front()).collect(),
            None => Vec::new(),
        }
    }

    pub fn pop_right(&self, key: &[u8], count: usize) -> Vec<Bytes> {
        let mut lists = self.lists.write().unwrap();
        match lists.get_mut(key) {
            Some(list) => (0..count).filter_map(|_| list.pop_back()).collect(),
            None => Vec::new(),
        }
    }

    pub fn len(&self, key: &[u8]) -> usize {
        self.lists.read().unwrap().get(key).map(VecDeque::len).unwrap_or(0)
    }

    /// Redis-style `LRANGE`: negative indices count from the end, both
    /// bounds inclusive after clamping, any `start > end` yields empty.
    pub fn range(&self, key: &[u8], start: i64, end: i64) -> Vec<Bytes> {
        let lists = self.lists.read().unwrap();
        let list = match lists.get(key) {
            Some(l) if !l.is_empty() => l,
            _ => return Vec::new(),
        };
        let len = list.len() as i64;
        let normalize = |i: i64| -> i64 {
            if i < 0 {
                (len + i).max(0)
            } else {
                i
            }
        };
        let start = normalize(start);
        let end = normalize(end).min(len - 1);
        if start > end || start >= len {
            return Vec::new();
        }
        list.iter().skip(start as usize).take((end - start + 1) as usize).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpush_then_lrange_full_returns_insertion_order() {
        let store = ListStore::new();
        store.push_right(b"k", [Bytes::from("a"), Bytes::from("b"), Bytes::from("c")]);
        assert_eq!(store.range(b"k", 0, -1), vec![Bytes::from("a"), Bytes::from("b"), Bytes::from("c")]);
    }

    #[test]
    fn lpush_inserts_in_reverse_order() {
        let store = ListStore::new();
        store.push_left(b"k", [Bytes::from("a"), Bytes::from("b")]);
        assert_eq!(store.range(b"k", 0, -1), vec![Bytes::from("b"), Bytes::from("a")]);
    }

    #[test]
    fn pop_count_greater_than_one_drains_from_front() {
        let store = ListStore::new();
        store.push_right(b"k", [Bytes::from("a"), Bytes::from("b"), Bytes::from("c")]);
        assert_eq!(store.pop_left(b"k", 2), vec![Bytes::from("a"), Bytes::from("b")]);
        assert_eq!(store.len(b"k"), 1);
    }

    #[test]
    fn list_persists_after_being_emptied() {
        let store = ListStore::new();
        store.push_right(b"k", [Bytes::from("a")]);
        store.pop_left(b"k", 1);
        assert_eq!(store.len(b"k"), 0);
    }

    #[test]
    fn start_greater_than_end_after_clamping_is_empty() {
        let store = ListStore::new();
        store.push_right(b"k", [Bytes::from("a"), Bytes::from("b")]);
        assert_eq!(store.range(b"k", 5, 10), Vec::<Bytes>::new());
    }

    #[tokio::test]
    async fn push_wakes_a_waiting_blpop() {
        let store = Arc::new(ListStore::new());
        let handle = store.waiters().register(vec![Bytes::from("k")], ());
        store.push_right(b"k", [Bytes::from("v")]);
        assert!(matches!(
            handle.wait(std::time::Duration::from_millis(50)).await,
            crate::waiter::WaitOutcome::Signaled
        ));
        assert_eq!(store.pop_left(b"k", 1), vec![Bytes::from("v")]);
    }
}
