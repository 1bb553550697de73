use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

/// A "0" timeout on BLPOP/XREAD BLOCK means "wait indefinitely" in the
/// Redis wire contract; this server maps it to a long bounded wait
/// instead, matching the behavior of the system it was modeled on rather
/// than introducing true unbounded blocking.
pub const UNBOUNDED_WAIT_SENTINEL: Duration = Duration::from_secs(600);

struct Entry<K, T> {
    id: u64,
    keys: Vec<K>,
    payload: T,
    notify: Arc<Notify>,
}

/// Shared registry of blocking waiters, keyed by whatever key type the
/// caller's domain uses (list name, stream name). Used by both BLPOP and
/// XREAD BLOCK: the same FIFO-wakeup and predicate-wakeup primitives serve
/// list pushes and stream appends alike.
pub struct WaiterRegistry<K, T> {
    entries: Mutex<VecDeque<Entry<K, T>>>,
    next_id: AtomicU64,
}

impl<K: Eq + Clone, T> Default for WaiterRegistry<K, T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<K: Eq + Clone, T> WaiterRegistry<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new waiter interested in any of `keys`, carrying
    /// `payload` for predicate-based wakeups. Registration order is
    /// preserved, which is what gives `notify_count` its FIFO guarantee.
    pub fn register(self: &Arc<Self>, keys: Vec<K>, payload: T) -> WaiterHandle<K, T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let notify = Arc::new(Notify::new());
        self.entries.lock().unwrap().push_back(Entry {
            id,
            keys,
            payload,
            notify: notify.clone(),
        });
        WaiterHandle {
            registry: self.clone(),
            id,
            notify,
        }
    }

    /// Wakes up to `count` waiters registered against `key`, earliest
    /// registration first. Used when `count` elements are pushed onto a
    /// list: each pushed element wakes at most one waiter.
    pub fn notify_count(&self, key: &K, mut count: usize) {
        if count == 0 {
            return;
        }
        let mut entries = self.entries.lock().unwrap();
        let mut i = 0;
        while i < entries.len() && count > 0 {
            if entries[i].keys.contains(key) {
                let entry = entries.remove(i).unwrap();
                entry.notify.notify_one();
                count -= 1;
            } else {
                i += 1;
            }
        }
    }

    /// Wakes every waiter registered against `key` whose payload satisfies
    /// `pred`. Used by XADD: every blocked XREAD whose wait-ID is less
    /// than the newly appended entry's ID is woken.
    pub fn notify_where(&self, key: &K, pred: impl Fn(&T) -> bool) {
        let mut entries = self.entries.lock().unwrap();
        let mut i = 0;
        while i < entries.len() {
            if entries[i].keys.contains(key) && pred(&entries[i].payload) {
                let entry = entries.remove(i).unwrap();
                entry.notify.notify_one();
            } else {
                i += 1;
            }
        }
    }

    fn remove(&self, id: u64) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(pos) = entries.iter().position(|e| e.id == id) {
            entries.remove(pos);
        }
    }
}

pub enum WaitOutcome {
    Signaled,
    TimedOut,
}

/// A single registered wait. Dropping it (e.g. because the owning
/// connection disconnected mid-block) removes it from the registry so a
/// later push/append never tries to notify a waiter nobody is listening
/// for anymore.
pub struct WaiterHandle<K: Eq + Clone, T> {
    registry: Arc<WaiterRegistry<K, T>>,
    id: u64,
    notify: Arc<Notify>,
}

impl<K: Eq + Clone, T> WaiterHandle<K, T> {
    /// Awaits a signal, bounded by `timeout`. Callers that also need to
    /// observe client disconnect race this future in their own `select!`
    /// alongside a read-half EOF check.
    pub async fn wait(&self, timeout: Duration) -> WaitOutcome {
        match tokio::time::timeout(timeout, self.notify.notified()).await {
            Ok(()) => WaitOutcome::Signaled,
            Err(_) => WaitOutcome::TimedOut,
        }
    }

    pub fn notified_future(&self) -> impl std::future::Future<Output = ()> + '_ {
        self.notify.notified()
    }
}

impl<K: Eq + Clone, T> Drop for WaiterHandle<K, T> {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_count_wakes_in_fifo_order() {
        let registry: Arc<WaiterRegistry<String, ()>> = Arc::new(WaiterRegistry::new());
        let first = registry.register(vec!["k".to_string()], ());
        let second = registry.register(vec!["k".to_string()], ());

        registry.notify_count(&"k".to_string(), 1);

        assert!(matches!(
            first.wait(Duration::from_millis(50)).await,
            WaitOutcome::Signaled
        ));
        assert!(matches!(
            second.wait(Duration::from_millis(50)).await,
            WaitOutcome::TimedOut
        ));
    }

    #[tokio::test]
    async fn notify_where_wakes_matching_predicate_only() {
        let registry: Arc<WaiterRegistry<String, u64>> = Arc::new(WaiterRegistry::new());
        let low = registry.register(vec!["s".to_string()], 1);
        let high = registry.register(vec!["s".to_string()], 100);

        registry.notify_where(&"s".to_string(), |&wait_id| wait_id < 10);

        assert!(matches!(
            low.wait(Duration::from_millis(50)).await,
            WaitOutcome::Signaled
        ));
        assert!(matches!(
            high.wait(Duration::from_millis(50)).await,
            WaitOutcome::TimedOut
        ));
    }

    #[tokio::test]
    async fn dropped_waiter_is_not_notified_against() {
        let registry: Arc<WaiterRegistry<String, ()>> = Arc::new(WaiterRegistry::new());
        {
            let _dropped = registry.register(vec!["k".to_string()], ());
        }
        // should not panic even though the waiter above is gone
        registry.notify_count(&"k".to_string(), 5);
        assert_eq!(registry.entries.lock().unwrap().len(), 0);
    }
}
