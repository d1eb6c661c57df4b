//! Request coalescing.
//!
//! Concurrent callers asking for the same key share one in-flight call. The
//! first caller (the owner) starts the work on its own task; later callers
//! subscribe to the same shared future. The map entry is removed by that task
//! before the result is published, so a caller arriving afterwards starts a
//! fresh call.
//!
//! If the call's task itself fails (panics or is aborted) every waiter gets
//! a [`StorageError`], which callers treat as a coalescer fault rather than
//! an upstream result.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use edgeward_core::{EdgewardError, EdgewardResult, StorageError};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::Instrument;

type SharedResult<T> = Shared<BoxFuture<'static, EdgewardResult<T>>>;

struct InFlight<T> {
    id: u64,
    future: SharedResult<T>,
    subscribers: Arc<AtomicUsize>,
}

type InFlightMap<T> = Arc<Mutex<HashMap<String, InFlight<T>>>>;

/// Whether a caller started the call or joined one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoalesceRole {
    Owner,
    Subscriber,
}

/// Coalescer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoalescerStats {
    /// Calls started.
    pub owned: u64,
    /// Calls joined.
    pub joined: u64,
}

/// Deduplicates concurrent identical requests.
pub struct RequestCoalescer<T> {
    inflight: InFlightMap<T>,
    next_id: AtomicU64,
    owned: AtomicU64,
    joined: AtomicU64,
}

impl<T> RequestCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            owned: AtomicU64::new(0),
            joined: AtomicU64::new(0),
        }
    }

    /// Run `work` for `key`, or join the call already in flight for it.
    ///
    /// `work` is only invoked when this caller becomes the owner. Dropping
    /// the returned future does not cancel the call.
    pub async fn execute<F, Fut>(&self, key: &str, work: F) -> EdgewardResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EdgewardResult<T>> + Send + 'static,
    {
        self.execute_with_role(key, work).await.0
    }

    /// [`execute`](Self::execute), also reporting this caller's role.
    pub async fn execute_with_role<F, Fut>(&self, key: &str, work: F) -> (EdgewardResult<T>, CoalesceRole)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EdgewardResult<T>> + Send + 'static,
    {
        self.wait(key, None, work).await
    }

    /// [`execute_with_role`](Self::execute_with_role) with a deadline on this
    /// caller's wait.
    ///
    /// Timing out detaches this caller only; the call keeps running for the
    /// others.
    pub async fn execute_with_timeout<F, Fut>(
        &self,
        key: &str,
        timeout: Duration,
        work: F,
    ) -> (EdgewardResult<T>, CoalesceRole)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EdgewardResult<T>> + Send + 'static,
    {
        self.wait(key, Some(timeout), work).await
    }

    /// Number of keys with a call in flight.
    pub fn in_flight(&self) -> usize {
        lock(&self.inflight).len()
    }

    /// Callers currently waiting on `key`, if a call is in flight.
    pub fn subscribers(&self, key: &str) -> Option<usize> {
        lock(&self.inflight)
            .get(key)
            .map(|entry| entry.subscribers.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> CoalescerStats {
        CoalescerStats {
            owned: self.owned.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
        }
    }

    async fn wait<F, Fut>(&self, key: &str, timeout: Option<Duration>, work: F) -> (EdgewardResult<T>, CoalesceRole)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EdgewardResult<T>> + Send + 'static,
    {
        let (future, subscribers, role) = self.join_or_start(key, work);
        let _guard = SubscriberGuard(subscribers);
        let Some(limit) = timeout else {
            return (future.await, role);
        };
        match tokio::time::timeout(limit, future).await {
            Ok(result) => (result, role),
            Err(_) => {
                tracing::debug!(cache_key = %key, role = ?role, "Stopped waiting on coalesced call");
                let err = EdgewardError::Timeout {
                    operation: format!("coalesced call {}", key),
                    elapsed_ms: limit.as_millis() as u64,
                };
                (Err(err), role)
            }
        }
    }

    fn join_or_start<F, Fut>(&self, key: &str, work: F) -> (SharedResult<T>, Arc<AtomicUsize>, CoalesceRole)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EdgewardResult<T>> + Send + 'static,
    {
        let mut map = lock(&self.inflight);

        if let Some(existing) = map.get(key) {
            existing.subscribers.fetch_add(1, Ordering::AcqRel);
            self.joined.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(cache_key = %key, "Joined in-flight call");
            return (
                existing.future.clone(),
                Arc::clone(&existing.subscribers),
                CoalesceRole::Subscriber,
            );
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pending = work();
        let inflight = Arc::clone(&self.inflight);
        let owned_key = key.to_string();

        // The entry is inserted before this lock is released, so the task
        // can never try to remove it first. The guard also removes it when
        // the work panics or the task is aborted.
        let handle = tokio::spawn(
            async move {
                let entry = EntryGuard {
                    map: inflight,
                    key: owned_key,
                    id,
                };
                let result = pending.await;
                drop(entry);
                result
            }
            .in_current_span(),
        );

        let future = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(StorageError::BackendUnavailable {
                    reason: format!("coalesced call task failed: {}", e),
                }
                .into()),
            }
        }
        .boxed()
        .shared();

        let subscribers = Arc::new(AtomicUsize::new(1));
        map.insert(
            key.to_string(),
            InFlight {
                id,
                future: future.clone(),
                subscribers: Arc::clone(&subscribers),
            },
        );
        self.owned.fetch_add(1, Ordering::Relaxed);

        (future, subscribers, CoalesceRole::Owner)
    }
}

impl<T> Default for RequestCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for RequestCoalescer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoalescer")
            .field("in_flight", &lock(&self.inflight).len())
            .finish()
    }
}

/// Removes a call's map entry once the call is over, however it ended.
struct EntryGuard<T> {
    map: InFlightMap<T>,
    key: String,
    id: u64,
}

impl<T> Drop for EntryGuard<T> {
    fn drop(&mut self) {
        let mut map = lock(&self.map);
        if map.get(&self.key).map(|e| e.id) == Some(self.id) {
            map.remove(&self.key);
        }
    }
}

struct SubscriberGuard(Arc<AtomicUsize>);

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

// The map holds no invariants a panicking holder could break halfway, so a
// poisoned lock is still usable.
fn lock<T>(map: &Mutex<HashMap<String, InFlight<T>>>) -> MutexGuard<'_, HashMap<String, InFlight<T>>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_call() {
        let coalescer = Arc::new(RequestCoalescer::<u32>::new());
        let calls = Arc::new(AtomicU32::new(0));
        let (release_tx, release_rx) = tokio::sync::watch::channel(false);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let coalescer = Arc::clone(&coalescer);
            let calls = Arc::clone(&calls);
            let mut release = release_rx.clone();
            handles.push(tokio::spawn(async move {
                coalescer
                    .execute("acme:R1", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let _ = release.wait_for(|go| *go).await;
                        Ok(42)
                    })
                    .await
            }));
        }

        // Wait until every caller has joined before releasing the call.
        while coalescer.subscribers("acme:R1") != Some(10) {
            tokio::task::yield_now().await;
        }
        release_tx.send(true).unwrap();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coalescer.in_flight(), 0);
        assert_eq!(coalescer.stats(), CoalescerStats { owned: 1, joined: 9 });
    }

    #[tokio::test]
    async fn test_sequential_calls_are_fresh() {
        let coalescer = RequestCoalescer::<u32>::new();
        let calls = Arc::new(AtomicU32::new(0));
        for expected in 1..=3 {
            let calls = Arc::clone(&calls);
            let value = coalescer
                .execute("acme:R1", move || async move { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1) })
                .await
                .unwrap();
            assert_eq!(value, expected);
        }
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_errors_are_shared_and_cleared() {
        let coalescer = RequestCoalescer::<u32>::new();
        let err = coalescer
            .execute("acme:R1", || async { Err(EdgewardError::internal("boom")) })
            .await
            .unwrap_err();
        assert_eq!(err, EdgewardError::internal("boom"));
        assert_eq!(coalescer.in_flight(), 0);
    }

    fn explode() -> EdgewardResult<u32> {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_panicking_call_is_cleared() {
        let coalescer = RequestCoalescer::<u32>::new();
        let err = coalescer
            .execute("acme:R1", || async { explode() })
            .await
            .unwrap_err();
        assert!(matches!(err, EdgewardError::Storage(StorageError::BackendUnavailable { .. })));
        assert_eq!(coalescer.in_flight(), 0);

        let value = coalescer.execute("acme:R1", || async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_coalesce() {
        let coalescer = RequestCoalescer::<&'static str>::new();
        let (a, b) = tokio::join!(
            coalescer.execute("acme:R1", || async { Ok("a") }),
            coalescer.execute("acme:R2", || async { Ok("b") }),
        );
        assert_eq!(a.unwrap(), "a");
        assert_eq!(b.unwrap(), "b");
        assert_eq!(coalescer.stats().owned, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscriber_timeout_does_not_cancel_call() {
        let coalescer = Arc::new(RequestCoalescer::<u32>::new());
        let done = Arc::new(AtomicU32::new(0));

        let flag = Arc::clone(&done);
        let (result, role) = coalescer
            .execute_with_timeout("acme:R1", Duration::from_secs(1), move || async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                flag.store(1, Ordering::SeqCst);
                Ok(7)
            })
            .await;
        assert_eq!(role, CoalesceRole::Owner);
        assert!(matches!(result.unwrap_err(), EdgewardError::Timeout { .. }));
        assert_eq!(coalescer.subscribers("acme:R1"), Some(0));

        // A later caller joins the still-running call.
        let value = coalescer
            .execute("acme:R1", || async { Ok(99) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(coalescer.in_flight(), 0);
    }
}
