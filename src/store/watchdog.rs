//! Idle-staleness task.
//!
//! One task per device sleeps until the store's deadline (last touch plus the
//! idle window) and then asks the store to expire itself. The deadline is read
//! again on every wake-up, so a frame that arrived during the sleep simply
//! moves the next wake-up; there is never more than one timer per device.
//! Detaching the device stops the task through a oneshot channel.

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::store::{lock, ChangeSet, SharedStore};

pub struct Watchdog {
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl Watchdog {
    /// Spawn the task on the current tokio runtime.
    ///
    /// `on_clear` runs with the names that lost their value, outside the
    /// store lock.
    pub fn spawn<F>(store: SharedStore, on_clear: F) -> Self
    where
        F: Fn(ChangeSet) + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            loop {
                let wake_at = {
                    let guard = lock(&store);
                    guard
                        .deadline()
                        .unwrap_or_else(|| Instant::now() + guard.idle_window())
                };

                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = sleep_until(wake_at) => {
                        let cleared = lock(&store).expire_if_idle(Instant::now());
                        if !cleared.is_empty() {
                            on_clear(cleared);
                        }
                    }
                }
            }
            log::debug!("Watchdog stopped");
        });

        Watchdog {
            stop: Some(stop_tx),
            handle,
        }
    }

    /// Stop the task and wait for it to finish.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.handle).await {
            log::warn!("Watchdog task ended abnormally: {e}");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}
