//! Background maintenance: the reaper timer and the DNS watcher.
//!
//! Both tasks stop when the pool's shutdown token fires and are joined by
//! [`ConnectionPool::dispose`](crate::pool::ConnectionPool::dispose). Each
//! tick runs under its own cancellation token bounded by the tick period, so
//! one stuck pass cannot starve the next.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::Protocol;
use crate::pool::ConnectionPool;

const MIN_REAP_PERIOD: Duration = Duration::from_secs(1);
const MAX_REAP_PERIOD: Duration = Duration::from_secs(60);

/// Spawn the idle-session reaper, if the settings enable one.
pub(crate) fn spawn_reaper(pool: &ConnectionPool) -> Option<JoinHandle<()>> {
    let idle_timeout = pool.settings().idle_timeout;
    if idle_timeout.is_zero() {
        return None;
    }
    let period = (idle_timeout / 2).clamp(MIN_REAP_PERIOD, MAX_REAP_PERIOD);
    let shutdown = pool.shutdown_token();
    let pool = pool.clone();

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so the pool is not
        // reaped the moment it is created.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let tick_cancel = CancellationToken::new();
            let reap = pool.reap(&tick_cancel);
            if tokio::time::timeout(period, reap).await.is_err() {
                tick_cancel.cancel();
                tracing::warn!(
                    pool = %pool.display_name(),
                    "reap pass exceeded its period and was cancelled"
                );
            }
        }
    }))
}

async fn resolve_host(host: &str, port: u16) -> std::io::Result<HashSet<IpAddr>> {
    let addrs = tokio::net::lookup_host((host, port)).await?;
    Ok(addrs.map(|addr| addr.ip()).collect())
}

/// Per-host address sets from the previous check.
#[derive(Default)]
pub(crate) struct DnsSnapshot {
    known: HashMap<String, HashSet<IpAddr>>,
}

impl DnsSnapshot {
    /// Record the latest resolution for `host`; reports a change when any
    /// previously stored address is missing from the new set.
    ///
    /// The first observation of a host is never a change.
    pub(crate) fn observe(&mut self, host: &str, addrs: HashSet<IpAddr>) -> bool {
        let changed = self
            .known
            .get(host)
            .is_some_and(|previous| previous.iter().any(|addr| !addrs.contains(addr)));
        self.known.insert(host.to_string(), addrs);
        changed
    }
}

/// Spawn the DNS-change watcher, if the settings enable one.
///
/// Only meaningful for TCP: pipe and unix transports do not resolve names.
pub(crate) fn spawn_dns_watcher(pool: &ConnectionPool) -> Option<JoinHandle<()>> {
    let settings = pool.settings();
    if settings.protocol != Protocol::Tcp || settings.dns_check_interval.is_zero() {
        return None;
    }
    let period = settings.dns_check_interval;
    let hosts = settings.hosts.clone();
    let port = settings.port;
    let shutdown = pool.shutdown_token();
    let pool = pool.clone();

    Some(tokio::spawn(async move {
        let mut snapshot = DnsSnapshot::default();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let mut changed = false;
            for host in &hosts {
                match resolve_host(host, port).await {
                    Ok(addrs) => {
                        if snapshot.observe(host, addrs) {
                            tracing::info!(
                                pool = %pool.display_name(),
                                host = %host,
                                "DNS records changed"
                            );
                            changed = true;
                        }
                    }
                    Err(error) => {
                        tracing::debug!(
                            pool = %pool.display_name(),
                            host = %host,
                            error = %error,
                            "DNS resolution failed; will retry next tick"
                        );
                    }
                }
            }

            if changed {
                let tick_cancel = CancellationToken::new();
                let clear = pool.clear(&tick_cancel);
                if tokio::time::timeout(period, clear).await.is_err() {
                    tick_cancel.cancel();
                    tracing::warn!(
                        pool = %pool.display_name(),
                        "pool clear after DNS change exceeded the check period"
                    );
                }
            }
        }
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn addrs(list: &[&str]) -> HashSet<IpAddr> {
        list.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn test_first_observation_is_not_a_change() {
        let mut snapshot = DnsSnapshot::default();
        assert!(!snapshot.observe("db", addrs(&["10.0.0.1"])));
    }

    #[test]
    fn test_same_addresses_are_not_a_change() {
        let mut snapshot = DnsSnapshot::default();
        snapshot.observe("db", addrs(&["10.0.0.1", "10.0.0.2"]));
        assert!(!snapshot.observe("db", addrs(&["10.0.0.2", "10.0.0.1"])));
    }

    #[test]
    fn test_removed_address_is_a_change() {
        let mut snapshot = DnsSnapshot::default();
        snapshot.observe("db", addrs(&["10.0.0.1", "10.0.0.2"]));
        assert!(snapshot.observe("db", addrs(&["10.0.0.1"])));
    }

    #[test]
    fn test_added_address_is_not_a_change() {
        // Additions keep old sessions valid; only a departed address means
        // the server moved.
        let mut snapshot = DnsSnapshot::default();
        snapshot.observe("db", addrs(&["10.0.0.1"]));
        assert!(!snapshot.observe("db", addrs(&["10.0.0.1", "10.0.0.9"])));
    }

    #[test]
    fn test_hosts_are_tracked_independently() {
        let mut snapshot = DnsSnapshot::default();
        snapshot.observe("a", addrs(&["10.0.0.1"]));
        snapshot.observe("b", addrs(&["10.0.1.1"]));
        assert!(snapshot.observe("a", addrs(&["10.0.0.2"])));
        assert!(!snapshot.observe("b", addrs(&["10.0.1.1"])));
    }
}
