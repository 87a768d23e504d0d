//! Session lifecycle: the transport seam and the pool's tracked state.
//!
//! The wire protocol, handshake, and SQL surface live behind
//! [`SessionTransport`]; the pool only drives lifecycle transitions. Each
//! live session is wrapped in a [`PooledSession`] carrying the bookkeeping
//! the pool needs: identity, generation, timing, the owning connection's
//! weak reference, and the checkout permit it currently holds.

use std::sync::{Arc, Weak};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;

use crate::balancer::LoadBalancer;
use crate::config::PoolSettings;
use crate::error::SessionError;

/// One server session's transport: socket, handshake, and protocol state.
///
/// Implemented by the client layer; the pool treats it as a black box that
/// can connect, reset, and dispose.
#[async_trait]
pub trait SessionTransport: Send {
    /// Establish the session, consulting `balancer` for host order.
    ///
    /// Returns the server's connect status string, if it sent one (this is
    /// where redirection headers arrive).
    async fn connect(
        &mut self,
        settings: &PoolSettings,
        balancer: &LoadBalancer,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, SessionError>;

    /// Reset protocol state for reuse; `false` means the session cannot be
    /// reused and must be discarded. Implementations swallow their own
    /// errors into `false`.
    async fn try_reset(&mut self, settings: &PoolSettings, cancel: &CancellationToken) -> bool;

    /// Tear the session down. Best-effort; must not panic.
    async fn dispose(&mut self);

    /// Whether the transport still believes it is connected.
    fn is_connected(&self) -> bool;

    /// The host this transport connected to, once connected.
    fn connected_host(&self) -> Option<&str>;

    /// Whether the caller switched databases since connect, which forces a
    /// reset before the session can be reused.
    fn has_database_override(&self) -> bool;
}

/// Creates blank transports for the pool to connect.
pub trait SessionFactory: Send + Sync + 'static {
    /// Produce an unconnected transport.
    fn create_transport(&self) -> Box<dyn SessionTransport>;
}

/// Marker for the logical connection object that holds a leased session.
///
/// The pool stores only a [`Weak`] reference to the owner; when the owner is
/// dropped without returning its session, the weak reference stops resolving
/// and the leak scan reclaims the session.
pub trait SessionOwner: Send + Sync + 'static {}

/// Health classification of a session at return time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionHealth {
    /// Connected, current generation, within lifetime.
    Healthy,
    /// Transport reports it is no longer connected.
    Disconnected,
    /// Created before the last pool clear.
    StaleGeneration,
    /// Exceeded the configured connection lifetime.
    Expired,
}

/// A server session tracked by the pool.
pub struct PooledSession {
    id: u64,
    generation: u32,
    created_at: Instant,
    host: Option<String>,
    last_returned: parking_lot::Mutex<Instant>,
    owner: parking_lot::Mutex<Option<Weak<dyn SessionOwner>>>,
    permit: parking_lot::Mutex<Option<OwnedSemaphorePermit>>,
    transport: tokio::sync::Mutex<Box<dyn SessionTransport>>,
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl PooledSession {
    pub(crate) fn new(
        id: u64,
        generation: u32,
        transport: Box<dyn SessionTransport>,
    ) -> Arc<Self> {
        let now = Instant::now();
        let host = transport.connected_host().map(str::to_string);
        Arc::new(Self {
            id,
            generation,
            created_at: now,
            host,
            last_returned: parking_lot::Mutex::new(now),
            owner: parking_lot::Mutex::new(None),
            permit: parking_lot::Mutex::new(None),
            transport: tokio::sync::Mutex::new(transport),
        })
    }

    /// Pool-unique session id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Pool generation this session was created under.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Host the session connected to.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Time since the session was created.
    #[must_use]
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// Time since the session was last returned to the pool.
    #[must_use]
    pub fn idle_for(&self) -> std::time::Duration {
        self.last_returned.lock().elapsed()
    }

    /// Exclusive access to the transport, for the query layers above.
    pub async fn transport(&self) -> tokio::sync::MutexGuard<'_, Box<dyn SessionTransport>> {
        self.transport.lock().await
    }

    /// Whether the transport still reports connected.
    pub async fn is_connected(&self) -> bool {
        self.transport.lock().await.is_connected()
    }

    pub(crate) async fn has_database_override(&self) -> bool {
        self.transport.lock().await.has_database_override()
    }

    pub(crate) async fn try_reset(
        &self,
        settings: &PoolSettings,
        cancel: &CancellationToken,
    ) -> bool {
        self.transport.lock().await.try_reset(settings, cancel).await
    }

    pub(crate) async fn dispose(&self) {
        self.transport.lock().await.dispose().await;
    }

    pub(crate) fn touch_returned(&self) {
        *self.last_returned.lock() = Instant::now();
    }

    pub(crate) fn set_owner(&self, owner: Weak<dyn SessionOwner>) {
        *self.owner.lock() = Some(owner);
    }

    pub(crate) fn clear_owner(&self) {
        *self.owner.lock() = None;
    }

    /// If the owning connection is gone, install `placeholder` as the owner
    /// and report the session as leaked.
    ///
    /// The swap happens under the owner lock so two concurrent scans cannot
    /// both claim the same session; the caller must keep `placeholder`
    /// alive until the forced return completes.
    pub(crate) fn claim_if_leaked(&self, placeholder: &Arc<dyn SessionOwner>) -> bool {
        let mut owner = self.owner.lock();
        match owner.as_ref() {
            Some(weak) if weak.upgrade().is_none() => {
                *owner = Some(Arc::downgrade(placeholder));
                true
            }
            _ => false,
        }
    }

    pub(crate) fn store_permit(&self, permit: OwnedSemaphorePermit) {
        *self.permit.lock() = Some(permit);
    }

    pub(crate) fn take_permit(&self) -> Option<OwnedSemaphorePermit> {
        self.permit.lock().take()
    }
}
