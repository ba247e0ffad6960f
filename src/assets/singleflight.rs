//! Single-flight execution keyed by string.
//!
//! The first caller for a key runs the work; concurrent callers for the same
//! key subscribe and receive a clone of the leader's result. If a leader is
//! dropped before finishing, its followers retry and one of them leads.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlightStats {
    pub total: u64,
    pub led: u64,
    pub joined: u64,
}

pub struct SingleFlight<V> {
    in_flight: Mutex<HashMap<String, broadcast::Sender<V>>>,
    total: AtomicU64,
    led: AtomicU64,
    joined: AtomicU64,
}

enum Registration<'a, V> {
    Leader(LeaderGuard<'a, V>),
    Follower(broadcast::Receiver<V>),
}

/// Held by the leader. Dropping it without `complete` releases the key.
struct LeaderGuard<'a, V> {
    flights: &'a SingleFlight<V>,
    key: String,
    sender: broadcast::Sender<V>,
    done: bool,
}

impl<V: Clone> LeaderGuard<'_, V> {
    fn complete(mut self, value: V) -> V {
        self.flights.map().remove(&self.key);
        self.done = true;
        let waiters = self.sender.receiver_count();
        if waiters > 0 {
            debug!(key = %self.key, waiters, "Sharing result with waiting callers");
        }
        let _ = self.sender.send(value.clone());
        value
    }
}

impl<V> Drop for LeaderGuard<'_, V> {
    fn drop(&mut self) {
        if !self.done {
            self.flights.map().remove(&self.key);
        }
    }
}

impl<V: Clone> SingleFlight<V> {
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
            total: AtomicU64::new(0),
            led: AtomicU64::new(0),
            joined: AtomicU64::new(0),
        }
    }

    /// Run `work` for `key` unless a call for `key` is already in flight, in
    /// which case wait for and return that call's result.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        self.total.fetch_add(1, Ordering::Relaxed);
        loop {
            match self.register(key) {
                Registration::Leader(guard) => {
                    self.led.fetch_add(1, Ordering::Relaxed);
                    let value = work().await;
                    return guard.complete(value);
                }
                Registration::Follower(mut rx) => {
                    self.joined.fetch_add(1, Ordering::Relaxed);
                    match rx.recv().await {
                        Ok(value) => return value,
                        Err(_) => {
                            debug!(key, "In-flight leader went away, retrying");
                            continue;
                        }
                    }
                }
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.map().len()
    }

    pub fn stats(&self) -> FlightStats {
        FlightStats {
            total: self.total.load(Ordering::Relaxed),
            led: self.led.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
        }
    }

    fn register(&self, key: &str) -> Registration<'_, V> {
        let mut map = self.map();
        if let Some(tx) = map.get(key) {
            return Registration::Follower(tx.subscribe());
        }
        let (tx, _) = broadcast::channel(1);
        map.insert(key.to_string(), tx.clone());
        Registration::Leader(LeaderGuard {
            flights: self,
            key: key.to_string(),
            sender: tx,
            done: false,
        })
    }
}

impl<V> SingleFlight<V> {
    fn map(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<V>>> {
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<V: Clone> Default for SingleFlight<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let flights = Arc::new(SingleFlight::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flights = flights.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                flights
                    .run("sku", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_millis(50)).await;
                        7
                    })
                    .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
        let stats = flights.stats();
        assert_eq!(stats.total, 8);
        assert_eq!(stats.led, 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let flights = SingleFlight::<String>::new();
        let a = flights.run("a", || async { "A".to_string() });
        let b = flights.run("b", || async { "B".to_string() });
        let (a, b) = tokio::join!(a, b);
        assert_eq!((a.as_str(), b.as_str()), ("A", "B"));
        assert_eq!(flights.stats().led, 2);
    }

    #[tokio::test]
    async fn test_sequential_calls_run_again() {
        let flights = SingleFlight::<u32>::new();
        assert_eq!(flights.run("k", || async { 1 }).await, 1);
        assert_eq!(flights.run("k", || async { 2 }).await, 2);
    }

    #[tokio::test]
    async fn test_follower_takes_over_when_leader_is_cancelled() {
        let flights = Arc::new(SingleFlight::<u32>::new());

        let leader = {
            let flights = flights.clone();
            tokio::spawn(async move {
                flights
                    .run("k", || async {
                        sleep(Duration::from_secs(30)).await;
                        1
                    })
                    .await
            })
        };
        sleep(Duration::from_millis(20)).await;

        let follower = {
            let flights = flights.clone();
            tokio::spawn(async move { flights.run("k", || async { 2 }).await })
        };
        sleep(Duration::from_millis(20)).await;
        leader.abort();

        assert_eq!(follower.await.unwrap(), 2);
        assert_eq!(flights.in_flight(), 0);
    }
}
