//! Memoized in-flight operations.
//!
//! A second caller asking for an operation that is already running joins
//! it and receives the same outcome instead of starting a duplicate. Once
//! the operation settles the entry is dropped, so a later call runs afresh.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::sync::Mutex;

type SharedOp<T> = Shared<BoxFuture<'static, T>>;

/// Table of running operations keyed by `K`.
pub struct Inflight<K, T: Clone> {
    ops: Mutex<HashMap<K, SharedOp<T>>>,
}

impl<K, T> Default for Inflight<K, T>
where
    T: Clone,
{
    fn default() -> Self {
        Self {
            ops: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, T> Inflight<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the operation for `key`, or join the one already running.
    ///
    /// `make` is only called when no operation for `key` is in flight.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let op = {
            let mut ops = self.ops.lock().await;
            if let Some(existing) = ops.get(&key) {
                existing.clone()
            } else {
                let op = make().boxed().shared();
                ops.insert(key.clone(), op.clone());
                op
            }
        };

        let outcome = op.clone().await;

        // Only remove our own entry; a newer operation may have replaced it
        let mut ops = self.ops.lock().await;
        if ops.get(&key).is_some_and(|current| Shared::ptr_eq(current, &op)) {
            ops.remove(&key);
        }

        outcome
    }

    /// Whether an operation for `key` is running.
    pub async fn contains(&self, key: &K) -> bool {
        self.ops.lock().await.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let inflight: Arc<Inflight<&'static str, u32>> = Arc::new(Inflight::new());
        let runs = Arc::new(AtomicU32::new(0));

        let call = |inflight: Arc<Inflight<&'static str, u32>>, runs: Arc<AtomicU32>| async move {
            inflight
                .run("srv", move || async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    runs.fetch_add(1, Ordering::SeqCst) + 1
                })
                .await
        };

        let (a, b, c) = tokio::join!(
            call(inflight.clone(), runs.clone()),
            call(inflight.clone(), runs.clone()),
            call(inflight.clone(), runs.clone()),
        );

        assert_eq!((a, b, c), (1, 1, 1));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!inflight.contains(&"srv").await);
    }

    #[tokio::test]
    async fn test_settled_operation_runs_again() {
        let inflight: Inflight<u8, u32> = Inflight::new();
        let runs = Arc::new(AtomicU32::new(0));

        for expected in 1..=2 {
            let runs = runs.clone();
            let value = inflight
                .run(0, move || async move { runs.fetch_add(1, Ordering::SeqCst) + 1 })
                .await;
            assert_eq!(value, expected);
        }
    }
}
