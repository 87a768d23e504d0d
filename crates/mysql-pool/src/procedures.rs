//! Stored-procedure metadata cache.
//!
//! Owned by the pool so cached metadata survives across the logical
//! connections sharing it, and is invalidated wholesale when the pool is
//! cleared. The command layer populates and reads it under the lock returned
//! by [`ConnectionPool::procedure_cache`](crate::pool::ConnectionPool::procedure_cache).

use std::collections::HashMap;

/// Metadata for one stored procedure.
#[derive(Debug, Clone)]
pub struct CachedProcedure {
    /// Parameter names in declaration order.
    pub parameters: Vec<String>,
}

/// Cache of stored-procedure lookups, including negative entries for
/// procedures that were not found.
#[derive(Debug, Default)]
pub struct ProcedureCache {
    entries: HashMap<String, Option<CachedProcedure>>,
}

impl ProcedureCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a procedure by its normalized name.
    ///
    /// `Some(None)` means the procedure was previously looked up and does
    /// not exist.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Option<CachedProcedure>> {
        self.entries.get(name)
    }

    /// Record a lookup result.
    pub fn insert(&mut self, name: String, procedure: Option<CachedProcedure>) {
        self.entries.insert(name, procedure);
    }

    /// Number of cached lookups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caches_hits_and_misses() {
        let mut cache = ProcedureCache::new();
        cache.insert(
            "orders.place".to_string(),
            Some(CachedProcedure {
                parameters: vec!["customer_id".to_string(), "total".to_string()],
            }),
        );
        cache.insert("orders.missing".to_string(), None);

        assert_eq!(cache.len(), 2);
        assert!(cache.get("orders.place").unwrap().is_some());
        assert!(cache.get("orders.missing").unwrap().is_none());
        assert!(cache.get("orders.unknown").is_none());
    }
}
