//! In-flight operation deduplication
//!
//! Concurrent callers asking for the same operation key share one execution:
//! the first caller registers a shared future, later callers join it, and all
//! of them receive the same value or the same error.
//!
//! The shared future removes its own table entry when it completes, before
//! handing the result out. Removal therefore happens on success and failure
//! alike, and a caller dropped mid-flight cannot strand an entry: whoever
//! polls the future next finishes it and cleans up. A panicking operation is
//! caught and becomes a population error, so it cannot poison the entry.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

use crate::types::{GatewayError, Result};

type Pending<T> = Shared<BoxFuture<'static, Result<T>>>;

/// Pending operation table
pub struct SingleFlight<T: Clone + Send + Sync + 'static> {
    pending: Arc<DashMap<String, Pending<T>>>,
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Run `operation` unless one is already in flight for `key`, in which
    /// case wait for that one instead.
    ///
    /// `operation` is called with no table lock held. A panic inside the
    /// operation reaches every waiter as a population error.
    pub async fn run_exclusive<F, Fut>(&self, key: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if let Some(existing) = self.pending.get(key).map(|entry| entry.value().clone()) {
            debug!(key = key, "Joining in-flight operation");
            return existing.await;
        }

        let fut = operation();
        let pending = Arc::clone(&self.pending);
        let owned_key = key.to_string();
        let candidate = async move {
            let result = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(key = %owned_key, panic = %message, "In-flight operation panicked");
                    Err(GatewayError::population(format!("operation panicked: {}", message)))
                }
            };
            pending.remove(&owned_key);
            result
        }
        .boxed()
        .shared();

        let shared = match self.pending.entry(key.to_string()) {
            // Registered by another caller meanwhile; ours is dropped unpolled
            Entry::Occupied(entry) => {
                debug!(key = key, "Joining in-flight operation");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                entry.insert(candidate.clone());
                candidate
            }
        };

        shared.await
    }

    /// Number of operations currently in flight
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Whether an operation is in flight for `key`
    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let flights = Arc::new(SingleFlight::<u64>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let flights = Arc::clone(&flights);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    flights
                        .run_exclusive("caching:set:supply", move || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(42)
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failure_reaches_all_waiters_and_clears_entry() {
        let flights = Arc::new(SingleFlight::<u64>::new());

        let slow_fail = {
            let flights = Arc::clone(&flights);
            tokio::spawn(async move {
                flights
                    .run_exclusive("k", || async {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Err(GatewayError::Population("upstream down".into()))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(flights.is_pending("k"));

        let joined = flights.run_exclusive("k", || async { Ok(1) }).await;
        assert_eq!(joined, Err(GatewayError::Population("upstream down".into())));
        assert_eq!(slow_fail.await.unwrap(), Err(GatewayError::Population("upstream down".into())));

        // A later call runs fresh instead of observing the failed handle
        assert!(!flights.is_pending("k"));
        assert_eq!(flights.run_exclusive("k", || async { Ok(7) }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_namespaces_do_not_collide() {
        let flights = SingleFlight::<&'static str>::new();
        let (get, set) = tokio::join!(
            flights.run_exclusive("caching:get:k", || async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok("get")
            }),
            flights.run_exclusive("caching:set:k", || async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok("set")
            }),
        );
        assert_eq!(get, Ok("get"));
        assert_eq!(set, Ok("set"));
    }

    #[tokio::test]
    async fn test_dropped_owner_does_not_strand_entry() {
        let flights = Arc::new(SingleFlight::<u64>::new());

        let owner = {
            let flights = Arc::clone(&flights);
            tokio::spawn(async move {
                flights
                    .run_exclusive("k", || async {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(5)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        owner.abort();

        // The joiner drives the shared future to completion and cleans up
        assert_eq!(flights.run_exclusive("k", || async { Ok(9) }).await, Ok(5));
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_panicking_operation_fails_waiters_and_clears_entry() {
        let flights = Arc::new(SingleFlight::<u64>::new());

        let owner = {
            let flights = Arc::clone(&flights);
            tokio::spawn(async move {
                flights
                    .run_exclusive("caching:set:k", || async {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        panic!("indexer client bug")
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let joined = flights.run_exclusive("caching:set:k", || async { Ok(1) }).await;

        assert!(matches!(
            joined,
            Err(GatewayError::Population(ref m)) if m.contains("indexer client bug")
        ));
        assert!(matches!(owner.await.unwrap(), Err(GatewayError::Population(_))));
        assert_eq!(flights.in_flight(), 0);
        assert_eq!(flights.run_exclusive("caching:set:k", || async { Ok(7) }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_operation_may_inspect_table() {
        let flights = Arc::new(SingleFlight::<usize>::new());
        let inspector = Arc::clone(&flights);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            flights.run_exclusive("caching:set:k", move || {
                let seen =
                    inspector.in_flight() + usize::from(inspector.is_pending("caching:set:k"));
                async move { Ok(seen) }
            }),
        )
        .await
        .expect("operation deadlocked on the pending table");

        assert_eq!(result, Ok(0));
        assert_eq!(flights.in_flight(), 0);
    }
}
