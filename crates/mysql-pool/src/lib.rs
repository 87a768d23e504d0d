//! # mysql-driver-pool
//!
//! Purpose-built connection pool for MySQL with session lifecycle
//! management.
//!
//! Unlike generic connection pools, this implementation understands the
//! session lifecycle of a MySQL client: protocol reset on reuse, pool
//! generations for wholesale invalidation, server-issued connect
//! redirection, host load balancing for multi-host configurations, and
//! recovery of sessions whose owning connection was dropped without being
//! returned.
//!
//! ## Features
//!
//! - Bounded checkout with cancellation-aware waiting (FIFO fairness)
//! - LIFO idle reuse with protocol reset (`Connection Reset`)
//! - Lazy minimum-fill (`Minimum Pool Size`) and idle reaping
//!   (`Connection Idle Timeout`), session age limits (`Connection LifeTime`)
//! - Pool registry keyed by normalized connection string, with negative
//!   caching for `Pooling=false`
//! - Leak recovery through weak ownership tracking
//! - DNS-change watching that clears the pool when a server moves
//! - Server redirection (`Server Redirection Mode`)
//! - OpenTelemetry `db.client.connections.*` metrics behind the `otel`
//!   feature
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! use mysql_driver_pool::{PoolRegistry, SessionOwner};
//! use tokio_util::sync::CancellationToken;
//!
//! struct MyConnection;
//! impl SessionOwner for MyConnection {}
//!
//! let registry = PoolRegistry::new(Arc::new(MySessionFactory));
//! let _cleanup = registry.shutdown_guard();
//!
//! let pool = registry
//!     .get_or_create("Server=db1,db2;User Id=app;Password=...;Maximum Pool Size=20")?
//!     .expect("pooling enabled");
//!
//! let owner = Arc::new(MyConnection);
//! let cancel = CancellationToken::new();
//! let session = pool.checkout(&owner, Instant::now(), &cancel).await?;
//! // ... run queries through session.transport() ...
//! pool.return_session(session).await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod balancer;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod pool;
pub mod procedures;
pub mod registry;
pub mod shutdown;

mod metrics;
mod redirect;
mod tasks;

pub use metrics::metric_names;

// Configuration
pub use config::{
    LoadBalancePolicy, PoolSettings, Protocol, RedirectionMode, TlsMode, TlsSettings,
};

// Error types
pub use error::{PoolError, SessionError};

// Session lifecycle
pub use lifecycle::{
    PooledSession, SessionFactory, SessionHealth, SessionOwner, SessionTransport,
};

// Pool types
pub use balancer::{HostConnectionCounts, LoadBalancer};
pub use pool::{ConnectionPool, PoolStatus};
pub use procedures::{CachedProcedure, ProcedureCache};
pub use registry::PoolRegistry;
pub use shutdown::ShutdownGuard;
