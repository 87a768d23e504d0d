//! Pool error types.

use thiserror::Error;

/// Errors surfaced by pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The caller's cancellation token fired before or during the operation.
    #[error("operation was cancelled")]
    Cancelled,

    /// The cancellation token fired while waiting for a checkout permit.
    ///
    /// All sessions were in use for the caller's entire connect-timeout
    /// window; surfaced separately from [`PoolError::Cancelled`] so callers
    /// can report it as a connect timeout.
    #[error("connect timeout: all pooled sessions are in use")]
    Exhausted,

    /// Establishing a new server session failed.
    #[error("failed to establish a server session")]
    Connect {
        /// The underlying transport error.
        #[source]
        source: SessionError,
    },

    /// Server redirection is required but no successful redirect occurred.
    ///
    /// Either the server omitted the redirect header or the redirected
    /// connect failed; in the latter case the failure is attached as cause.
    #[error("server redirection is required but was not performed")]
    RedirectionRequired {
        /// The redirected connect failure, if one was attempted.
        #[source]
        source: Option<SessionError>,
    },

    /// The pool has been disposed.
    #[error("connection pool is shut down")]
    Closed,

    /// Invalid connection-string or pool configuration.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

/// Errors reported by the session transport collaborator.
///
/// The wire protocol and authentication handshake live behind
/// [`SessionTransport`](crate::lifecycle::SessionTransport); this is the
/// error surface the pool observes from it.
#[derive(Debug, Error)]
pub enum SessionError {
    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server rejected authentication.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The server reported an error during the handshake.
    #[error("server error: {0}")]
    Server(String),

    /// Every candidate host failed to connect.
    #[error("unable to connect to any of the specified hosts")]
    AllHostsFailed,

    /// The operation was cancelled mid-handshake.
    #[error("session operation was cancelled")]
    Cancelled,
}
