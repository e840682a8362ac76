//! Request coalescing: concurrent callers asking for the same key share one
//! in-flight operation.
//!
//! The entry for a key is evicted as soon as its operation completes, whether
//! it succeeded or failed, so the next call after completion starts fresh.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use pvault_core::VaultResult;

type Flight<V> = Shared<BoxFuture<'static, VaultResult<V>>>;

struct Inflight<K, V> {
    flights: Mutex<HashMap<K, (u64, Flight<V>)>>,
    generation: AtomicU64,
}

/// Cheap to clone; clones share the same in-flight table.
pub struct SingleFlight<K, V> {
    inner: Arc<Inflight<K, V>>,
}

impl<K, V> Clone for SingleFlight<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inflight {
                flights: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Run `make()` for `key`, or join the flight already running for it.
    ///
    /// `make` is only called when no flight exists; joiners receive a clone of
    /// the leader's result.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> VaultResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = VaultResult<V>> + Send + 'static,
    {
        let (generation, flight) = {
            let mut flights = self.inner.flights.lock().expect("single-flight lock poisoned");
            match flights.get(&key) {
                Some((generation, flight)) => {
                    tracing::trace!("joining in-flight operation");
                    (*generation, flight.clone())
                }
                None => {
                    let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
                    let flight = make().boxed().shared();
                    flights.insert(key.clone(), (generation, flight.clone()));
                    (generation, flight)
                }
            }
        };

        let result = flight.await;

        // evict on completion; a newer flight under the same key stays
        let mut flights = self.inner.flights.lock().expect("single-flight lock poisoned");
        if matches!(flights.get(&key), Some((g, _)) if *g == generation) {
            flights.remove(&key);
        }
        result
    }

    /// Number of keys with an operation currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner
            .flights
            .lock()
            .expect("single-flight lock poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvault_core::VaultError;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let flight: SingleFlight<&str, u32> = SingleFlight::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let calls = (0..8).map(|_| {
            let runs = runs.clone();
            flight.run("key", move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(42)
            })
        });
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(|r| *r == Ok(42)));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(flight.in_flight(), 0, "entry evicted after completion");
    }

    #[tokio::test]
    async fn test_sequential_calls_run_again() {
        let flight: SingleFlight<&str, u32> = SingleFlight::new();
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let runs = runs.clone();
            flight
                .run("key", move || async move { Ok(runs.fetch_add(1, Ordering::SeqCst) as u32) })
                .await
                .unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failure_is_shared_and_evicted() {
        let flight: SingleFlight<u8, u32> = SingleFlight::new();

        let calls = (0..3).map(|_| {
            flight.run(1, || async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Err(VaultError::Integrity)
            })
        });
        for result in futures::future::join_all(calls).await {
            assert_eq!(result, Err(VaultError::Integrity));
        }
        assert_eq!(flight.in_flight(), 0);

        let retry = flight.run(1, || async { Ok(7) }).await;
        assert_eq!(retry, Ok(7));
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_coalesce() {
        let flight: SingleFlight<u8, u8> = SingleFlight::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let calls = (0..4u8).map(|k| {
            let runs = runs.clone();
            flight.run(k, move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(k)
            })
        });
        let results = futures::future::join_all(calls).await;
        assert_eq!(results, vec![Ok(0), Ok(1), Ok(2), Ok(3)]);
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }
}
