//! Bounded session pool: checkout, return, clear, reap, leak recovery.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::balancer::{HostConnectionCounts, LoadBalancer};
use crate::config::{LoadBalancePolicy, PoolSettings, RedirectionMode};
use crate::error::{PoolError, SessionError};
use crate::lifecycle::{PooledSession, SessionFactory, SessionHealth, SessionOwner};
use crate::metrics::PoolMetrics;
use crate::procedures::ProcedureCache;
use crate::redirect::RedirectTarget;
use crate::tasks;

/// Minimum spacing between leak-recovery scans.
const LEAK_SCAN_INTERVAL: Duration = Duration::from_millis(1000);

/// How long maintenance waits for a permit before deciding the pool is
/// saturated and stale sessions will be cleaned on return instead.
const CLEAN_PERMIT_TIMEOUT: Duration = Duration::from_millis(10);

/// Synthetic owner installed on a leaked session while it is being
/// reclaimed, so a concurrent scan does not claim it twice.
struct ReclaimedOwner;

impl SessionOwner for ReclaimedOwner {}

struct PoolInner {
    settings: Arc<PoolSettings>,
    factory: Arc<dyn SessionFactory>,
    display_name: Arc<str>,

    /// Bumped on clear; sessions from older generations are discarded on
    /// their next checkout or return.
    generation: AtomicU32,
    last_session_id: AtomicU64,
    closed: AtomicBool,

    /// Sessions available for checkout. Reused LIFO from the front; the
    /// reaper scans from the back where the coldest sessions sit.
    idle: parking_lot::Mutex<VecDeque<Arc<PooledSession>>>,
    /// Sessions currently handed out, by session id.
    leased: parking_lot::Mutex<HashMap<u64, Arc<PooledSession>>>,

    /// One permit per leased or in-flight session.
    permits: Arc<Semaphore>,
    /// Serializes reap and clear against each other. Checkout is not
    /// excluded; it cooperates through `permits` and the idle-list lock.
    clean_lock: tokio::sync::Mutex<()>,

    last_leak_scan: parking_lot::Mutex<Option<Instant>>,
    host_counts: Option<HostConnectionCounts>,
    balancer: LoadBalancer,
    procedure_cache: parking_lot::Mutex<Option<Arc<parking_lot::Mutex<ProcedureCache>>>>,
    metrics: PoolMetrics,

    shutdown: CancellationToken,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

/// A bounded pool of server sessions for one connection string.
///
/// Cloning is cheap and shares the underlying pool. The pool hands out
/// [`PooledSession`]s with [`checkout`](ConnectionPool::checkout), takes
/// them back with [`return_session`](ConnectionPool::return_session), and
/// keeps itself healthy through the reaper, the DNS watcher, and the
/// leak-recovery scan.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status();
        f.debug_struct("ConnectionPool")
            .field("name", &self.inner.display_name)
            .field("status", &status)
            .finish()
    }
}

/// Point-in-time gauge snapshot for a pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Sessions available for checkout.
    pub idle: u32,
    /// Sessions currently handed out.
    pub used: u32,
    /// Configured maximum.
    pub max: u32,
    /// Callers currently waiting on the pool.
    pub pending_requests: i64,
}

impl PoolStatus {
    /// Total extant sessions: idle plus used.
    #[must_use]
    pub fn usage(&self) -> u32 {
        self.idle + self.used
    }

    /// Share of the configured maximum currently in use.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        f64::from(self.used) / f64::from(self.max)
    }
}

impl ConnectionPool {
    /// Create a pool for the given settings.
    ///
    /// Background maintenance is not started here; the registry starts it
    /// on the pool that wins the creation race (see
    /// [`start_background_tasks`](ConnectionPool::start_background_tasks)).
    pub fn new(
        settings: Arc<PoolSettings>,
        factory: Arc<dyn SessionFactory>,
    ) -> Result<Self, PoolError> {
        settings.validate()?;

        let host_counts = (settings.load_balance == LoadBalancePolicy::LeastConnections)
            .then(HostConnectionCounts::default);
        let balancer = LoadBalancer::for_policy(settings.load_balance, host_counts.clone());
        let display_name: Arc<str> = settings.display_name().into();
        let metrics = PoolMetrics::new(&display_name);
        metrics.add_limits(
            i64::from(settings.minimum_pool_size),
            i64::from(settings.maximum_pool_size),
        );

        tracing::info!(
            pool = %display_name,
            min = settings.minimum_pool_size,
            max = settings.maximum_pool_size,
            "connection pool created"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                permits: Arc::new(Semaphore::new(settings.maximum_pool_size as usize)),
                settings,
                factory,
                display_name,
                generation: AtomicU32::new(0),
                last_session_id: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                idle: parking_lot::Mutex::new(VecDeque::new()),
                leased: parking_lot::Mutex::new(HashMap::new()),
                clean_lock: tokio::sync::Mutex::new(()),
                last_leak_scan: parking_lot::Mutex::new(None),
                host_counts,
                balancer,
                procedure_cache: parking_lot::Mutex::new(None),
                metrics,
                shutdown: CancellationToken::new(),
                tasks: parking_lot::Mutex::new(Vec::new()),
            }),
        })
    }

    /// The pool's display name (never contains the password).
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.inner.display_name
    }

    /// The pool's settings.
    #[must_use]
    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }

    /// Whether `other` is the same pool object.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Current gauge snapshot.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            idle: self.inner.metrics.idle().max(0) as u32,
            used: self.inner.metrics.used().max(0) as u32,
            max: self.inner.settings.maximum_pool_size,
            pending_requests: self.inner.metrics.pending(),
        }
    }

    /// Adjust the pending-requests gauge; called by the connection layer
    /// around its wait for a session.
    pub fn add_pending_request_count(&self, delta: i64) {
        self.inner.metrics.add_pending(delta);
    }

    /// The shared stored-procedure cache, created on first use and dropped
    /// on [`clear`](ConnectionPool::clear).
    #[must_use]
    pub fn procedure_cache(&self) -> Arc<parking_lot::Mutex<ProcedureCache>> {
        let mut slot = self.inner.procedure_cache.lock();
        slot.get_or_insert_with(|| Arc::new(parking_lot::Mutex::new(ProcedureCache::new())))
            .clone()
    }

    fn current_generation(&self) -> u32 {
        self.inner.generation.load(Ordering::Acquire)
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Check out a session for `owner`.
    ///
    /// `start` is when the caller began opening its logical connection and
    /// anchors the wait-time measurement; `cancel` carries the caller's
    /// connect timeout. On any failure after a permit was acquired the
    /// permit is released before the error propagates.
    pub async fn checkout<O: SessionOwner>(
        &self,
        owner: &Arc<O>,
        start: Instant,
        cancel: &CancellationToken,
    ) -> Result<Arc<PooledSession>, PoolError> {
        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        // All permits taken is the signal that a careless caller may have
        // leaked a session; sweep before joining the wait.
        if self.inner.permits.available_permits() == 0 && self.leak_scan_due() {
            self.recover_leaked_sessions().await;
        }

        if self.inner.settings.minimum_pool_size > 0 {
            self.ensure_minimum_sessions(cancel).await?;
        }

        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(PoolError::Exhausted),
            permit = Arc::clone(&self.inner.permits).acquire_owned() => {
                permit.map_err(|_| PoolError::Closed)?
            }
        };

        let owner: Arc<dyn SessionOwner> = owner.clone();
        let owner: Weak<dyn SessionOwner> = Arc::downgrade(&owner);

        let popped = self.inner.idle.lock().pop_front();
        if let Some(session) = popped {
            self.inner.metrics.add_idle(-1);
            if self.prepare_for_reuse(&session, cancel).await {
                session.set_owner(owner);
                session.store_permit(permit);
                self.inner.leased.lock().insert(session.id(), session.clone());
                self.inner.metrics.add_used(1);
                self.inner.metrics.record_wait_time(start.elapsed());
                tracing::trace!(session_id = session.id(), "reusing pooled session");
                return Ok(session);
            }
            tracing::debug!(session_id = session.id(), "discarding pooled session");
            self.adjust_host_count(&session, -1);
            session.dispose().await;
        }

        // Permit is dropped (released) if the connect fails.
        let session = self.connect_session(cancel).await?;
        session.set_owner(owner);
        session.store_permit(permit);
        self.inner.leased.lock().insert(session.id(), session.clone());
        self.inner.metrics.add_used(1);
        tracing::trace!(session_id = session.id(), "leased new session");
        Ok(session)
    }

    /// Decide whether an idle session can be handed out again.
    async fn prepare_for_reuse(
        &self,
        session: &Arc<PooledSession>,
        cancel: &CancellationToken,
    ) -> bool {
        if session.generation() != self.current_generation() {
            return false;
        }
        let needs_reset =
            self.inner.settings.connection_reset || session.has_database_override().await;
        if !needs_reset {
            return true;
        }
        session.try_reset(&self.inner.settings, cancel).await
    }

    /// Return a session to the pool.
    ///
    /// Infallible from the caller's perspective: an unhealthy session is
    /// disposed with errors swallowed, and the checkout permit is always
    /// released exactly once.
    pub async fn return_session(&self, session: Arc<PooledSession>) {
        // Dropped on every path out of this function.
        let permit = session.take_permit();

        if self.inner.leased.lock().remove(&session.id()).is_none() {
            tracing::debug!(session_id = session.id(), "session returned twice; ignoring");
            return;
        }
        self.inner.metrics.add_used(-1);
        session.clear_owner();

        let health = self.session_health(&session).await;
        match health {
            SessionHealth::Healthy => {
                session.touch_returned();
                self.inner.idle.lock().push_front(session);
                self.inner.metrics.add_idle(1);
            }
            _ => {
                tracing::debug!(
                    session_id = session.id(),
                    health = ?health,
                    "disposing returned session"
                );
                self.adjust_host_count(&session, -1);
                session.dispose().await;
            }
        }

        drop(permit);
    }

    async fn session_health(&self, session: &PooledSession) -> SessionHealth {
        if !session.is_connected().await {
            return SessionHealth::Disconnected;
        }
        if session.generation() != self.current_generation() {
            return SessionHealth::StaleGeneration;
        }
        let lifetime = self.inner.settings.connection_lifetime;
        if !lifetime.is_zero() && session.age() >= lifetime {
            return SessionHealth::Expired;
        }
        SessionHealth::Healthy
    }

    /// Invalidate every extant session.
    ///
    /// Bumps the pool generation so leased sessions are discarded as they
    /// come back, drops the procedure cache, reclaims leaked sessions, and
    /// disposes the idle sessions that can be reached right now.
    pub async fn clear(&self, cancel: &CancellationToken) {
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(pool = %self.inner.display_name, generation, "clearing connection pool");
        *self.inner.procedure_cache.lock() = None;
        self.recover_leaked_sessions().await;
        self.clean_pool(|session| session.generation() != generation, false, cancel)
            .await;
    }

    /// Evict idle sessions that have sat unused past the idle timeout,
    /// never dropping the pool below its configured minimum.
    pub async fn reap(&self, cancel: &CancellationToken) {
        self.recover_leaked_sessions().await;
        let idle_timeout = self.inner.settings.idle_timeout;
        if idle_timeout.is_zero() {
            return;
        }
        self.clean_pool(
            move |session| session.idle_for() >= idle_timeout,
            true,
            cancel,
        )
        .await;
    }

    /// Shut the pool down: stop background maintenance and retract the
    /// configured-limit gauges.
    ///
    /// Idle sessions are deliberately left open; the process-exit hook runs
    /// a final [`clear`](ConnectionPool::clear) over every pool.
    pub async fn dispose(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        self.inner.metrics.add_limits(
            -i64::from(self.inner.settings.minimum_pool_size),
            -i64::from(self.inner.settings.maximum_pool_size),
        );
        tracing::info!(pool = %self.inner.display_name, "connection pool disposed");
    }

    /// Start the reaper and DNS watcher for this pool. Idempotent.
    ///
    /// Must be called from within a tokio runtime; the registry does this
    /// for the pool that wins the creation race.
    pub fn start_background_tasks(&self) {
        let mut tasks = self.inner.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        if let Some(handle) = tasks::spawn_reaper(self) {
            tasks.push(handle);
        }
        if let Some(handle) = tasks::spawn_dns_watcher(self) {
            tasks.push(handle);
        }
    }

    /// Retract a pool that lost the registry's creation race before anyone
    /// used it.
    pub(crate) fn retire_unused(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.metrics.add_limits(
            -i64::from(self.inner.settings.minimum_pool_size),
            -i64::from(self.inner.settings.maximum_pool_size),
        );
    }

    /// Connect a brand-new session, following server redirection when the
    /// settings allow it.
    async fn connect_session(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<PooledSession>, PoolError> {
        let started = Instant::now();
        let id = self.inner.last_session_id.fetch_add(1, Ordering::Relaxed) + 1;
        let generation = self.current_generation();

        let mut transport = self.inner.factory.create_transport();
        let status = match transport
            .connect(&self.inner.settings, &self.inner.balancer, cancel)
            .await
        {
            Ok(status) => status,
            Err(error) => {
                transport.dispose().await;
                return Err(match error {
                    SessionError::Cancelled => PoolError::Cancelled,
                    source => PoolError::Connect { source },
                });
            }
        };

        let mode = self.inner.settings.redirection_mode;
        let target = status.as_deref().and_then(RedirectTarget::parse);
        if mode == RedirectionMode::Disabled {
            if target.is_some() {
                tracing::debug!(
                    pool = %self.inner.display_name,
                    "ignoring server redirection header (redirection disabled)"
                );
            }
        } else {
            let mut redirected = false;
            let mut redirect_failure: Option<SessionError> = None;
            if let Some(target) = target {
                if target.matches_endpoint(&self.inner.settings) {
                    tracing::debug!(host = %target.host, "already connected to redirect target");
                    redirected = true;
                } else {
                    let redirected_settings = self.inner.settings.redirected_to(&target);
                    let mut second = self.inner.factory.create_transport();
                    match second
                        .connect(&redirected_settings, &self.inner.balancer, cancel)
                        .await
                    {
                        Ok(_) => {
                            tracing::info!(
                                host = %target.host,
                                port = target.port,
                                ttl = ?target.ttl,
                                "followed server redirection"
                            );
                            transport.dispose().await;
                            transport = second;
                            redirected = true;
                        }
                        Err(error) => {
                            tracing::warn!(
                                host = %target.host,
                                error = %error,
                                "redirected connect failed; keeping original session"
                            );
                            second.dispose().await;
                            redirect_failure = Some(error);
                        }
                    }
                }
            }
            if mode == RedirectionMode::Required && !redirected {
                transport.dispose().await;
                return Err(PoolError::RedirectionRequired {
                    source: redirect_failure,
                });
            }
        }

        let session = PooledSession::new(id, generation, transport);
        self.adjust_host_count(&session, 1);
        self.inner.metrics.record_create_time(started.elapsed());
        tracing::debug!(
            session_id = id,
            host = ?session.host(),
            "created server session"
        );
        Ok(session)
    }

    /// Lazily fill the pool up to its configured minimum.
    ///
    /// Gives up without error when the pool is saturated; a caller about to
    /// take a permit matters more than the fill target.
    async fn ensure_minimum_sessions(&self, cancel: &CancellationToken) -> Result<(), PoolError> {
        let minimum = self.inner.settings.minimum_pool_size as usize;
        let maximum = self.inner.settings.maximum_pool_size as usize;
        loop {
            if cancel.is_cancelled() {
                return Err(PoolError::Cancelled);
            }
            let extant = (maximum - self.inner.permits.available_permits())
                + self.inner.idle.lock().len();
            if extant >= minimum {
                return Ok(());
            }
            let Ok(permit) = Arc::clone(&self.inner.permits).try_acquire_owned() else {
                return Ok(());
            };
            let session = self.connect_session(cancel).await?;
            self.inner.idle.lock().push_front(session);
            self.inner.metrics.add_idle(1);
            drop(permit);
        }
    }

    fn leak_scan_due(&self) -> bool {
        self.inner
            .last_leak_scan
            .lock()
            .is_none_or(|at| at.elapsed() >= LEAK_SCAN_INTERVAL)
    }

    /// Force-return every leased session whose owning connection has been
    /// dropped without returning it.
    async fn recover_leaked_sessions(&self) {
        *self.inner.last_leak_scan.lock() = Some(Instant::now());

        // Installed as the owner of each claimed session; held strong until
        // the returns below complete so a concurrent scan sees a live owner.
        let placeholder: Arc<dyn SessionOwner> = Arc::new(ReclaimedOwner);
        let leaked: Vec<Arc<PooledSession>> = {
            let leased = self.inner.leased.lock();
            leased
                .values()
                .filter(|session| session.claim_if_leaked(&placeholder))
                .cloned()
                .collect()
        };

        for session in leaked {
            tracing::warn!(
                pool = %self.inner.display_name,
                session_id = session.id(),
                "recovering leaked session"
            );
            self.return_session(session).await;
        }

        drop(placeholder);
    }

    /// Evict idle sessions matching `should_discard`, oldest first.
    ///
    /// Serialized against other maintenance passes. Stops at the first
    /// non-matching session: the back of the idle list is the coldest, so
    /// everything in front of it is newer and will not match either.
    async fn clean_pool(
        &self,
        should_discard: impl Fn(&PooledSession) -> bool,
        respect_minimum: bool,
        cancel: &CancellationToken,
    ) {
        let _clean = self.inner.clean_lock.lock().await;
        let minimum = self.inner.settings.minimum_pool_size as usize;
        let maximum = self.inner.settings.maximum_pool_size as usize;

        loop {
            if cancel.is_cancelled() {
                return;
            }
            if respect_minimum {
                let extant = (maximum - self.inner.permits.available_permits())
                    + self.inner.idle.lock().len();
                if extant <= minimum {
                    return;
                }
            }

            // A permit pairs the eviction with checkout traffic; if none
            // frees up quickly the pool is saturated and stale sessions
            // will be discarded on return instead.
            let permit = match tokio::time::timeout(
                CLEAN_PERMIT_TIMEOUT,
                self.inner.permits.acquire(),
            )
            .await
            {
                Ok(Ok(permit)) => permit,
                _ => return,
            };

            let Some(session) = self.inner.idle.lock().pop_back() else {
                return;
            };
            self.inner.metrics.add_idle(-1);

            if should_discard(&session) {
                tracing::debug!(session_id = session.id(), "evicting idle session");
                self.adjust_host_count(&session, -1);
                session.dispose().await;
            } else {
                self.inner.idle.lock().push_back(session);
                self.inner.metrics.add_idle(1);
                return;
            }

            drop(permit);
        }
    }

    fn adjust_host_count(&self, session: &PooledSession, delta: i64) {
        if let (Some(counts), Some(host)) = (&self.inner.host_counts, session.host()) {
            counts.adjust(host, delta);
        }
    }

    /// The shared host-count map, when least-connections balancing is on.
    #[must_use]
    pub fn host_connection_counts(&self) -> Option<&HostConnectionCounts> {
        self.inner.host_counts.as_ref()
    }

    /// Identity key for registry-level deduplication.
    pub(crate) fn registry_key(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use crate::lifecycle::SessionTransport;

    #[derive(Default)]
    struct FakeServer {
        connects: AtomicUsize,
        disposes: AtomicUsize,
        resets: AtomicUsize,
    }

    struct FakeTransport {
        server: Arc<FakeServer>,
        host: Option<String>,
        connected: bool,
    }

    #[async_trait]
    impl SessionTransport for FakeTransport {
        async fn connect(
            &mut self,
            settings: &PoolSettings,
            balancer: &LoadBalancer,
            cancel: &CancellationToken,
        ) -> Result<Option<String>, SessionError> {
            if cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            let host = balancer
                .arrange(&settings.hosts)
                .into_iter()
                .next()
                .ok_or(SessionError::AllHostsFailed)?;
            self.host = Some(host);
            self.connected = true;
            self.server.connects.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn try_reset(&mut self, _: &PoolSettings, _: &CancellationToken) -> bool {
            self.server.resets.fetch_add(1, Ordering::SeqCst);
            true
        }

        async fn dispose(&mut self) {
            if self.connected {
                self.connected = false;
                self.server.disposes.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn connected_host(&self) -> Option<&str> {
            self.host.as_deref()
        }

        fn has_database_override(&self) -> bool {
            false
        }
    }

    struct FakeFactory {
        server: Arc<FakeServer>,
    }

    impl SessionFactory for FakeFactory {
        fn create_transport(&self) -> Box<dyn SessionTransport> {
            Box::new(FakeTransport {
                server: Arc::clone(&self.server),
                host: None,
                connected: false,
            })
        }
    }

    struct TestOwner;

    impl SessionOwner for TestOwner {}

    fn pool_with(settings: PoolSettings) -> (ConnectionPool, Arc<FakeServer>) {
        let server = Arc::new(FakeServer::default());
        let pool = ConnectionPool::new(
            Arc::new(settings),
            Arc::new(FakeFactory {
                server: Arc::clone(&server),
            }),
        )
        .unwrap();
        (pool, server)
    }

    #[tokio::test]
    async fn test_checkout_discards_stale_generation_session() {
        let (pool, server) = pool_with(PoolSettings::new().maximum_pool_size(2));
        let owner = Arc::new(TestOwner);
        let cancel = CancellationToken::new();

        let session = pool.checkout(&owner, Instant::now(), &cancel).await.unwrap();
        let first_id = session.id();
        pool.return_session(session).await;
        assert_eq!(pool.status().idle, 1);

        // Invalidate the idle session without running clear's own eviction.
        pool.inner.generation.fetch_add(1, Ordering::AcqRel);

        let session = pool.checkout(&owner, Instant::now(), &cancel).await.unwrap();
        assert_ne!(session.id(), first_id);
        assert_eq!(server.disposes.load(Ordering::SeqCst), 1);
        assert_eq!(server.connects.load(Ordering::SeqCst), 2);
        assert_eq!(pool.status().idle, 0);
        assert_eq!(pool.status().used, 1);
        pool.return_session(session).await;
    }

    #[tokio::test]
    async fn test_return_disposes_expired_session() {
        let (pool, server) = pool_with(
            PoolSettings::new()
                .maximum_pool_size(2)
                .connection_lifetime(Duration::from_millis(20)),
        );
        let owner = Arc::new(TestOwner);
        let cancel = CancellationToken::new();

        let session = pool.checkout(&owner, Instant::now(), &cancel).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        pool.return_session(session).await;

        assert_eq!(pool.status().idle, 0);
        assert_eq!(pool.status().used, 0);
        assert_eq!(server.disposes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_return_twice_is_ignored() {
        let (pool, _server) = pool_with(PoolSettings::new().maximum_pool_size(1));
        let owner = Arc::new(TestOwner);
        let cancel = CancellationToken::new();

        let session = pool.checkout(&owner, Instant::now(), &cancel).await.unwrap();
        pool.return_session(Arc::clone(&session)).await;
        pool.return_session(session).await;

        let status = pool.status();
        assert_eq!(status.idle, 1);
        assert_eq!(status.used, 0);
        assert_eq!(pool.inner.permits.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_reset_skipped_when_disabled_and_no_override() {
        let (pool, server) = pool_with(
            PoolSettings::new()
                .maximum_pool_size(1)
                .connection_reset(false),
        );
        let owner = Arc::new(TestOwner);
        let cancel = CancellationToken::new();

        let session = pool.checkout(&owner, Instant::now(), &cancel).await.unwrap();
        pool.return_session(session).await;
        let session = pool.checkout(&owner, Instant::now(), &cancel).await.unwrap();
        pool.return_session(session).await;

        assert_eq!(server.resets.load(Ordering::SeqCst), 0);
        assert_eq!(server.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reset_runs_when_enabled() {
        let (pool, server) = pool_with(PoolSettings::new().maximum_pool_size(1));
        let owner = Arc::new(TestOwner);
        let cancel = CancellationToken::new();

        let session = pool.checkout(&owner, Instant::now(), &cancel).await.unwrap();
        pool.return_session(session).await;
        let session = pool.checkout(&owner, Instant::now(), &cancel).await.unwrap();
        pool.return_session(session).await;

        assert_eq!(server.resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_checkout_after_dispose_fails() {
        let (pool, _server) = pool_with(PoolSettings::new().maximum_pool_size(1));
        pool.dispose().await;

        let owner = Arc::new(TestOwner);
        let cancel = CancellationToken::new();
        let err = pool.checkout(&owner, Instant::now(), &cancel).await;
        assert!(matches!(err, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn test_host_counts_follow_session_population() {
        let (pool, _server) = pool_with(
            PoolSettings::new()
                .maximum_pool_size(4)
                .load_balance(LoadBalancePolicy::LeastConnections)
                .hosts(vec!["only-host".to_string()]),
        );
        let owner = Arc::new(TestOwner);
        let cancel = CancellationToken::new();

        let a = pool.checkout(&owner, Instant::now(), &cancel).await.unwrap();
        let b = pool.checkout(&owner, Instant::now(), &cancel).await.unwrap();
        let counts = pool.host_connection_counts().unwrap();
        assert_eq!(counts.get("only-host"), 2);

        pool.return_session(a).await;
        // Idle sessions still count toward the host.
        assert_eq!(counts.get("only-host"), 2);

        let cancel_all = CancellationToken::new();
        pool.return_session(b).await;
        pool.clear(&cancel_all).await;
        assert_eq!(counts.get("only-host"), 0);
    }
}
