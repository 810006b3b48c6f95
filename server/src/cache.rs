use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// A single value memoised for `ttl`.
///
/// Readers that arrive while the value is being regenerated wait on the
/// mutex and then see the fresh value, so the regenerator runs once per
/// expired window no matter how many readers contend.
pub struct CachedValue<T> {
    ttl: Duration,
    slot: Mutex<Option<(T, Instant)>>,
}

impl<T: Clone> CachedValue<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get_value<F, Fut>(&self, regenerate: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut slot = self.slot.lock().await;
        if let Some((value, generated_at)) = slot.as_ref() {
            if generated_at.elapsed() < self.ttl {
                return value.clone();
            }
        }

        let value = regenerate().await;
        *slot = Some((value.clone(), Instant::now()));
        value
    }

    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}
