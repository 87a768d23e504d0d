//! Host-selection strategies for multi-host configurations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::LoadBalancePolicy;

/// Shared per-host session counts.
///
/// Present only for the least-connections policy; the pool adjusts counts as
/// sessions are created and discarded, the balancer reads them when ordering
/// hosts. Guarded by its own lock, never held across I/O.
#[derive(Debug, Clone, Default)]
pub struct HostConnectionCounts {
    counts: Arc<Mutex<HashMap<String, usize>>>,
}

impl HostConnectionCounts {
    /// Current session count for a host.
    #[must_use]
    pub fn get(&self, host: &str) -> usize {
        self.counts.lock().get(host).copied().unwrap_or(0)
    }

    pub(crate) fn adjust(&self, host: &str, delta: i64) {
        let mut counts = self.counts.lock();
        let entry = counts.entry(host.to_string()).or_insert(0);
        if delta >= 0 {
            *entry += delta as usize;
        } else {
            *entry = entry.saturating_sub(delta.unsigned_abs() as usize);
        }
    }
}

/// Orders candidate hosts for connection attempts.
///
/// The transport's connect loop consults the balancer on every attempt and
/// tries the returned hosts in order.
#[derive(Debug)]
pub enum LoadBalancer {
    /// Hosts in configured order.
    FailOver,
    /// Rotating start position.
    RoundRobin {
        /// Connect-attempt counter; the starting host is `cursor % len`.
        cursor: AtomicUsize,
    },
    /// Shuffled copy per attempt.
    Random,
    /// Fewest open sessions first, configured order breaking ties.
    LeastConnections {
        /// Count map shared with the pool.
        counts: HostConnectionCounts,
    },
}

impl LoadBalancer {
    pub(crate) fn for_policy(
        policy: LoadBalancePolicy,
        counts: Option<HostConnectionCounts>,
    ) -> Self {
        match policy {
            LoadBalancePolicy::FailOver => Self::FailOver,
            LoadBalancePolicy::RoundRobin => Self::RoundRobin {
                cursor: AtomicUsize::new(0),
            },
            LoadBalancePolicy::Random => Self::Random,
            LoadBalancePolicy::LeastConnections => Self::LeastConnections {
                counts: counts.unwrap_or_default(),
            },
        }
    }

    /// Produce the ordered list of hosts to attempt.
    #[must_use]
    pub fn arrange(&self, hosts: &[String]) -> Vec<String> {
        match self {
            Self::FailOver => hosts.to_vec(),
            Self::RoundRobin { cursor } => {
                let mut ordered = hosts.to_vec();
                if !ordered.is_empty() {
                    let start = cursor.fetch_add(1, Ordering::Relaxed) % ordered.len();
                    ordered.rotate_left(start);
                }
                ordered
            }
            Self::Random => {
                use rand::seq::SliceRandom;
                let mut ordered = hosts.to_vec();
                ordered.shuffle(&mut rand::thread_rng());
                ordered
            }
            Self::LeastConnections { counts } => {
                let mut ordered = hosts.to_vec();
                // Stable sort keeps configured order among equally-loaded hosts.
                ordered.sort_by_key(|host| counts.get(host));
                ordered
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_failover_keeps_order() {
        let balancer = LoadBalancer::for_policy(LoadBalancePolicy::FailOver, None);
        assert_eq!(balancer.arrange(&hosts(&["a", "b", "c"])), hosts(&["a", "b", "c"]));
        assert_eq!(balancer.arrange(&hosts(&["a", "b", "c"])), hosts(&["a", "b", "c"]));
    }

    #[test]
    fn test_round_robin_rotates() {
        let balancer = LoadBalancer::for_policy(LoadBalancePolicy::RoundRobin, None);
        let list = hosts(&["a", "b", "c"]);
        assert_eq!(balancer.arrange(&list), hosts(&["a", "b", "c"]));
        assert_eq!(balancer.arrange(&list), hosts(&["b", "c", "a"]));
        assert_eq!(balancer.arrange(&list), hosts(&["c", "a", "b"]));
        assert_eq!(balancer.arrange(&list), hosts(&["a", "b", "c"]));
    }

    #[test]
    fn test_random_is_permutation() {
        let balancer = LoadBalancer::for_policy(LoadBalancePolicy::Random, None);
        let list = hosts(&["a", "b", "c", "d"]);
        let mut arranged = balancer.arrange(&list);
        arranged.sort();
        let mut expected = list.clone();
        expected.sort();
        assert_eq!(arranged, expected);
    }

    #[test]
    fn test_least_connections_sorts_ascending() {
        let counts = HostConnectionCounts::default();
        counts.adjust("a", 3);
        counts.adjust("b", 1);
        counts.adjust("c", 2);
        let balancer =
            LoadBalancer::for_policy(LoadBalancePolicy::LeastConnections, Some(counts));
        assert_eq!(balancer.arrange(&hosts(&["a", "b", "c"])), hosts(&["b", "c", "a"]));
    }

    #[test]
    fn test_least_connections_stable_tie_break() {
        let counts = HostConnectionCounts::default();
        counts.adjust("c", 1);
        let balancer =
            LoadBalancer::for_policy(LoadBalancePolicy::LeastConnections, Some(counts));
        // a and b both at zero keep their configured order.
        assert_eq!(balancer.arrange(&hosts(&["a", "b", "c"])), hosts(&["a", "b", "c"]));
    }

    #[test]
    fn test_counts_never_go_negative() {
        let counts = HostConnectionCounts::default();
        counts.adjust("a", -1);
        assert_eq!(counts.get("a"), 0);
        counts.adjust("a", 2);
        counts.adjust("a", -1);
        assert_eq!(counts.get("a"), 1);
    }
}
