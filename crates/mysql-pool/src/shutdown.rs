//! Process-exit cleanup.
//!
//! Server sessions should not be abandoned mid-protocol when the process
//! exits. Holding a [`ShutdownGuard`] for the life of the application (or
//! dropping it explicitly on the way out) clears every pool in the registry
//! so sessions are closed with a proper quit, errors swallowed.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::registry::PoolRegistry;

/// Upper bound on how long exit cleanup may run.
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(5);

/// Clears every registered pool when dropped.
///
/// The cleanup runs on a dedicated thread with its own small runtime, so it
/// works no matter where the guard is dropped — inside an async context, on
/// the main thread after the runtime is gone, or during unwinding.
///
/// ```rust,ignore
/// let registry = PoolRegistry::new(factory);
/// let _cleanup = registry.shutdown_guard();
/// // ... application runs ...
/// // `_cleanup` dropping at the end of main clears all pools.
/// ```
#[must_use = "the guard clears pools when dropped; binding it to _ drops it immediately"]
pub struct ShutdownGuard {
    registry: PoolRegistry,
}

impl PoolRegistry {
    /// Create a guard that clears this registry's pools when dropped.
    pub fn shutdown_guard(&self) -> ShutdownGuard {
        ShutdownGuard {
            registry: self.clone(),
        }
    }
}

impl std::fmt::Debug for ShutdownGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownGuard").finish_non_exhaustive()
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        let registry = self.registry.clone();
        let worker = std::thread::Builder::new()
            .name("mysql-pool-shutdown".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(error) => {
                        tracing::debug!(error = %error, "shutdown cleanup could not start");
                        return;
                    }
                };
                runtime.block_on(async {
                    let cancel = CancellationToken::new();
                    let cleared =
                        tokio::time::timeout(SHUTDOWN_BUDGET, registry.clear_all(&cancel)).await;
                    if cleared.is_err() {
                        cancel.cancel();
                        tracing::debug!("shutdown cleanup exceeded its budget");
                    }
                });
            });

        match worker {
            Ok(worker) => {
                let _ = worker.join();
            }
            Err(error) => {
                tracing::debug!(error = %error, "could not spawn shutdown cleanup thread");
            }
        }
    }
}
