//! Process-wide mapping from connection strings to pools.
//!
//! The registry is plain state, not a singleton: construct one per process
//! (or per test) and share it. Entries are created lazily, never removed —
//! only cleared — and swept collectively by the shutdown hook.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::config::PoolSettings;
use crate::error::PoolError;
use crate::lifecycle::SessionFactory;
use crate::pool::ConnectionPool;

struct RegistryInner {
    factory: Arc<dyn SessionFactory>,
    /// Pools by connection string. One pool may appear under several keys
    /// (raw and normalized spellings); `None` records a string with
    /// pooling disabled so it is not re-parsed on every lookup.
    pools: DashMap<String, Option<ConnectionPool>>,
    /// Single-slot cache for the common one-connection-string application.
    most_recent: parking_lot::Mutex<Option<(String, Option<ConnectionPool>)>>,
}

/// Registry of connection pools keyed by connection string.
///
/// Cloning is cheap and shares the registry.
#[derive(Clone)]
pub struct PoolRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("entries", &self.inner.pools.len())
            .finish()
    }
}

impl PoolRegistry {
    /// Create a registry whose pools connect through `factory`.
    #[must_use]
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                factory,
                pools: DashMap::new(),
                most_recent: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Look up the pool for `connection_string`, creating it if needed.
    ///
    /// Returns `None` when the string disables pooling. Two strings that
    /// normalize identically share one pool. Must be called from within a
    /// tokio runtime: the winning pool's background maintenance is started
    /// here.
    pub fn get_or_create(
        &self,
        connection_string: &str,
    ) -> Result<Option<ConnectionPool>, PoolError> {
        self.lookup(connection_string, true)
    }

    /// Look up an existing pool without creating one.
    pub fn get_existing(
        &self,
        connection_string: &str,
    ) -> Result<Option<ConnectionPool>, PoolError> {
        self.lookup(connection_string, false)
    }

    fn lookup(
        &self,
        connection_string: &str,
        create_if_missing: bool,
    ) -> Result<Option<ConnectionPool>, PoolError> {
        if let Some((cached_string, cached_pool)) = &*self.inner.most_recent.lock() {
            if cached_string == connection_string {
                return Ok(cached_pool.clone());
            }
        }

        if let Some(entry) = self.inner.pools.get(connection_string) {
            let pool = entry.value().clone();
            drop(entry);
            self.remember(connection_string, pool.clone());
            return Ok(pool);
        }

        let settings = PoolSettings::parse(connection_string)?;

        if !settings.pooling {
            self.inner
                .pools
                .insert(connection_string.to_string(), None);
            self.remember(connection_string, None);
            return Ok(None);
        }

        let normalized = settings.normalized_connection_string();
        if normalized != connection_string {
            let existing = self
                .inner
                .pools
                .get(&normalized)
                .and_then(|entry| entry.value().clone());
            if let Some(pool) = existing {
                self.inner
                    .pools
                    .entry(connection_string.to_string())
                    .or_insert_with(|| Some(pool.clone()));
                self.remember(connection_string, Some(pool.clone()));
                return Ok(Some(pool));
            }
        }

        if !create_if_missing {
            return Ok(None);
        }

        let pool = ConnectionPool::new(Arc::new(settings), Arc::clone(&self.inner.factory))?;
        let winner = match self.inner.pools.entry(normalized) {
            dashmap::Entry::Occupied(entry) => {
                // Another caller raced us to create this pool.
                tracing::debug!(
                    pool = %pool.display_name(),
                    "pool lost the creation race and was never used"
                );
                pool.retire_unused();
                entry.get().clone()
            }
            dashmap::Entry::Vacant(entry) => {
                entry.insert(Some(pool.clone()));
                pool.start_background_tasks();
                Some(pool)
            }
        };

        // Alias the raw spelling to the winner; a no-op when the raw string
        // is already the normalized key.
        self.inner
            .pools
            .entry(connection_string.to_string())
            .or_insert_with(|| winner.clone());
        self.remember(connection_string, winner.clone());
        Ok(winner)
    }

    fn remember(&self, connection_string: &str, pool: Option<ConnectionPool>) {
        *self.inner.most_recent.lock() = Some((connection_string.to_string(), pool));
    }

    /// Clear every distinct pool in the registry.
    ///
    /// A pool stored under several keys is cleared once.
    pub async fn clear_all(&self, cancel: &CancellationToken) {
        let mut seen = HashSet::new();
        let pools: Vec<ConnectionPool> = self
            .inner
            .pools
            .iter()
            .filter_map(|entry| entry.value().clone())
            .filter(|pool| seen.insert(pool.registry_key()))
            .collect();

        tracing::debug!(pools = pools.len(), "clearing all connection pools");
        for pool in pools {
            pool.clear(cancel).await;
        }
    }
}
