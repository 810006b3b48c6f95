//! Release callbacks run in reverse registration order at shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{error, info, warn};
use tokio::sync::Mutex;

use crate::error::ServerError;

#[async_trait]
pub trait Release: Send + Sync {
    fn name(&self) -> &str;

    async fn release(&self) -> Result<(), ServerError>;
}

pub struct ShutdownRegistry {
    callbacks: Mutex<Vec<Arc<dyn Release>>>,
    timeout: Duration,
}

impl ShutdownRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            callbacks: Mutex::new(Vec::new()),
            timeout,
        }
    }

    pub async fn register(&self, callback: Arc<dyn Release>) {
        self.callbacks.lock().await.push(callback);
    }

    /// Runs every callback, newest first, each bounded by the timeout.
    /// All callbacks run even when one fails; the first failure is returned.
    pub async fn run(&self) -> Result<(), ServerError> {
        let callbacks: Vec<Arc<dyn Release>> = self.callbacks.lock().await.drain(..).collect();
        let mut first_error = None;

        for callback in callbacks.into_iter().rev() {
            let name = callback.name().to_string();
            match tokio::time::timeout(self.timeout, callback.release()).await {
                Ok(Ok(())) => info!("Released {}", name),
                Ok(Err(e)) => {
                    error!("Releasing {} failed: {}", name, e);
                    first_error.get_or_insert(e);
                }
                Err(_) => {
                    warn!("Releasing {} timed out after {:?}", name, self.timeout);
                    first_error.get_or_insert(ServerError::ShutdownTimeout(name));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
