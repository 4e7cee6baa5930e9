//! Throttled fan-out of independent per-item operations.
//!
//! A [`WorkQueue`] runs one operation per input key, bounded by a shared
//! [`Throttle`], and waits for every item before reporting. Each key yields
//! exactly one value or one failure.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ItemFailure, PackError, Result};
use crate::throttle::Throttle;

/// Per-item results and failures of one queue run.
#[derive(Debug)]
pub struct QueueOutcome<K, V> {
    /// Successful items keyed by input
    pub results: HashMap<K, V>,
    /// Failed items, sorted by key
    pub failures: Vec<ItemFailure>,
}

impl<K, V> QueueOutcome<K, V> {
    /// True when no item failed.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// All results, or one combined error if any item failed.
    ///
    /// Successful results are discarded when any item fails; callers that
    /// want partial results read `results` directly.
    pub fn into_result(self) -> Result<HashMap<K, V>> {
        if self.failures.is_empty() {
            Ok(self.results)
        } else {
            Err(PackError::AggregateItem {
                failures: self.failures,
            })
        }
    }
}

/// Named worker pool over a throttle.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    name: String,
    throttle: Throttle,
}

impl WorkQueue {
    /// Create a queue drawing permits from `throttle`.
    pub fn new(name: impl Into<String>, throttle: Throttle) -> Self {
        Self {
            name: name.into(),
            throttle,
        }
    }

    /// Queue name (for logging)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `op` once per distinct item and wait for all of them.
    pub async fn run<K, V, F, Fut>(&self, items: Vec<K>, op: F) -> QueueOutcome<K, V>
    where
        K: Clone + Eq + Hash + Display + Send + Sync + 'static,
        V: Send + 'static,
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let results: Arc<Mutex<HashMap<K, V>>> = Arc::new(Mutex::new(HashMap::new()));
        let failures: Arc<Mutex<Vec<ItemFailure>>> = Arc::new(Mutex::new(Vec::new()));
        let op = Arc::new(op);

        let mut seen = HashSet::new();
        let mut handles = Vec::new();

        for item in items {
            if !seen.insert(item.clone()) {
                continue;
            }

            let key = item.to_string();
            let throttle = self.throttle.clone();
            let results = Arc::clone(&results);
            let failures = Arc::clone(&failures);
            let op = Arc::clone(&op);
            let queue = self.name.clone();

            let handle = tokio::spawn(async move {
                let permit = match throttle.take().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        failures.lock().push(ItemFailure::new(item.to_string(), e.to_string()));
                        return;
                    }
                };

                tracing::debug!(queue = %queue, item = %item, "Processing queue item");
                let outcome = op(item.clone()).await;
                permit.done();

                match outcome {
                    Ok(value) => {
                        results.lock().insert(item, value);
                    }
                    Err(e) => {
                        tracing::warn!(queue = %queue, item = %item, error = %e, "Queue item failed");
                        failures.lock().push(ItemFailure::new(item.to_string(), e.to_string()));
                    }
                }
            });
            handles.push((key, handle));
        }

        for (key, handle) in handles {
            if let Err(e) = handle.await {
                failures
                    .lock()
                    .push(ItemFailure::new(key, format!("worker aborted: {}", e)));
            }
        }

        let results = std::mem::take(&mut *results.lock());
        let mut failures = std::mem::take(&mut *failures.lock());
        failures.sort_by(|a, b| a.key.cmp(&b.key));

        tracing::info!(
            queue = %self.name,
            succeeded = results.len(),
            failed = failures.len(),
            "Queue finished"
        );

        QueueOutcome { results, failures }
    }
}
