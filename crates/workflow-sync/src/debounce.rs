//! Keyed trailing-edge debounce on tokio timers.
//!
//! Every call for a key restarts that key's quiet period. Only the latest
//! call runs, once the period passes without another call.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;

pub struct Debouncer<K> {
    delay: Duration,
    /// Latest call per key
    generations: Arc<Mutex<HashMap<K, u64>>>,
    counter: AtomicU64,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generations: Arc::new(Mutex::new(HashMap::new())),
            counter: AtomicU64::new(0),
        }
    }

    /// Schedule `task` for `key`, superseding any call still waiting.
    ///
    /// Outside a tokio runtime the call is dropped.
    pub fn call<T, Fut>(&self, key: K, task: T)
    where
        T: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            tracing::debug!("No runtime to debounce on, dropping call");
            return;
        };

        let generation = self.counter.fetch_add(1, Ordering::Relaxed);
        self.generations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), generation);

        let generations = Arc::clone(&self.generations);
        let delay = self.delay;
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            let latest = {
                let mut generations = generations.lock().unwrap_or_else(|e| e.into_inner());
                if generations.get(&key) == Some(&generation) {
                    generations.remove(&key);
                    true
                } else {
                    false
                }
            };
            if latest {
                task().await;
            }
        });
    }

    /// Drop the waiting call for `key`, if any.
    pub fn cancel(&self, key: &K) {
        self.generations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.generations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }
}
