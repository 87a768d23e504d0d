//! Pool configuration parsed from a connection string.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::PoolError;
use crate::redirect::RedirectTarget;

/// Transport protocol used to reach the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// TCP socket (default).
    #[default]
    Tcp,
    /// Windows named pipe.
    NamedPipe,
    /// Unix domain socket.
    Unix,
}

impl Protocol {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "tcp" | "socket" => Some(Self::Tcp),
            "pipe" | "namedpipe" | "named pipe" => Some(Self::NamedPipe),
            "unix" | "unixsocket" => Some(Self::Unix),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::NamedPipe => "pipe",
            Self::Unix => "unix",
        }
    }
}

/// Strategy for ordering candidate hosts on connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalancePolicy {
    /// Try hosts in configured order (default).
    #[default]
    FailOver,
    /// Rotate the starting host on each connect.
    RoundRobin,
    /// Shuffle the host list on each connect.
    Random,
    /// Prefer the host with the fewest open sessions.
    LeastConnections,
}

impl LoadBalancePolicy {
    fn parse(value: &str) -> Option<Self> {
        let canon: String = value
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();
        match canon.as_str() {
            "failover" => Some(Self::FailOver),
            "roundrobin" => Some(Self::RoundRobin),
            "random" => Some(Self::Random),
            "leastconnections" => Some(Self::LeastConnections),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::FailOver => "failover",
            Self::RoundRobin => "roundrobin",
            Self::Random => "random",
            Self::LeastConnections => "leastconnections",
        }
    }
}

/// Whether to honor server-issued redirection headers on connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectionMode {
    /// Ignore redirection headers (default).
    #[default]
    Disabled,
    /// Follow redirection when possible, fall back to the original session.
    Preferred,
    /// Fail the connect unless redirection succeeds.
    Required,
}

impl RedirectionMode {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "disabled" | "false" | "off" => Some(Self::Disabled),
            "preferred" => Some(Self::Preferred),
            "required" => Some(Self::Required),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Preferred => "preferred",
            Self::Required => "required",
        }
    }
}

/// TLS negotiation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// Never use TLS.
    Disabled,
    /// Use TLS if the server supports it (default).
    #[default]
    Preferred,
    /// Require TLS, without certificate verification.
    Required,
    /// Require TLS and verify the server certificate against a CA.
    VerifyCa,
}

impl TlsMode {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "disabled" | "none" => Some(Self::Disabled),
            "preferred" => Some(Self::Preferred),
            "required" => Some(Self::Required),
            "verifyca" | "verify ca" | "verify-ca" => Some(Self::VerifyCa),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Preferred => "preferred",
            Self::Required => "required",
            Self::VerifyCa => "verifyca",
        }
    }
}

/// TLS options carried for the transport's use.
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    /// Negotiation mode.
    pub mode: TlsMode,
    /// CA certificate file for [`TlsMode::VerifyCa`].
    pub ca_file: Option<PathBuf>,
}

/// Immutable configuration for one connection pool.
///
/// Built once from a connection string (or the builder helpers) and shared
/// by the pool, its background tasks, and the session transport.
#[derive(Clone)]
pub struct PoolSettings {
    /// Candidate server hosts, in configured order.
    pub hosts: Vec<String>,
    /// Server port (TCP protocol).
    pub port: u16,
    /// User name to authenticate as.
    pub user: String,
    password: String,
    /// Default database, if any.
    pub database: Option<String>,
    /// Application name; doubles as the pool's explicit display name.
    pub application_name: Option<String>,
    /// Transport protocol.
    pub protocol: Protocol,
    /// Whether pooling is enabled at all.
    pub pooling: bool,
    /// Lazy pre-fill target.
    pub minimum_pool_size: u32,
    /// Permit count; hard cap on concurrent sessions.
    pub maximum_pool_size: u32,
    /// Maximum session age; zero means unbounded.
    pub connection_lifetime: Duration,
    /// Idle TTL; zero disables the reaper.
    pub idle_timeout: Duration,
    /// Reset protocol state when reusing an idle session.
    pub connection_reset: bool,
    /// Host-ordering strategy for connect attempts.
    pub load_balance: LoadBalancePolicy,
    /// Server redirection behavior.
    pub redirection_mode: RedirectionMode,
    /// Interval between DNS re-checks; zero disables the watcher.
    pub dns_check_interval: Duration,
    /// Timeout for a single connect attempt.
    pub connect_timeout: Duration,
    /// TLS options.
    pub tls: TlsSettings,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            hosts: vec!["localhost".to_string()],
            port: 3306,
            user: String::new(),
            password: String::new(),
            database: None,
            application_name: None,
            protocol: Protocol::Tcp,
            pooling: true,
            minimum_pool_size: 0,
            maximum_pool_size: 100,
            connection_lifetime: Duration::ZERO,
            idle_timeout: Duration::from_secs(180),
            connection_reset: true,
            load_balance: LoadBalancePolicy::FailOver,
            redirection_mode: RedirectionMode::Disabled,
            dns_check_interval: Duration::ZERO,
            connect_timeout: Duration::from_secs(15),
            tls: TlsSettings::default(),
        }
    }
}

impl fmt::Debug for PoolSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolSettings")
            .field("hosts", &self.hosts)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("protocol", &self.protocol)
            .field("pooling", &self.pooling)
            .field("minimum_pool_size", &self.minimum_pool_size)
            .field("maximum_pool_size", &self.maximum_pool_size)
            .field("load_balance", &self.load_balance)
            .field("redirection_mode", &self.redirection_mode)
            .finish_non_exhaustive()
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, PoolError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(PoolError::Configuration(format!(
            "invalid boolean for {key}: {value}"
        ))),
    }
}

fn parse_u32(key: &str, value: &str) -> Result<u32, PoolError> {
    value
        .parse()
        .map_err(|_| PoolError::Configuration(format!("invalid number for {key}: {value}")))
}

impl PoolSettings {
    /// Create settings with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an ADO.NET-style connection string.
    ///
    /// ```text
    /// Server=db1,db2;Port=3306;User Id=app;Password=secret;Database=orders;
    /// Maximum Pool Size=20;Connection Idle Timeout=180
    /// ```
    ///
    /// Option names are case-insensitive and ignore embedded spaces.
    /// Unknown options are ignored for forward compatibility.
    pub fn parse(connection_string: &str) -> Result<Self, PoolError> {
        let mut settings = Self::default();

        for part in connection_string.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part.split_once('=').ok_or_else(|| {
                PoolError::Configuration(format!("invalid key-value pair: {part}"))
            })?;

            let canon: String = key
                .trim()
                .chars()
                .filter(|c| *c != ' ')
                .collect::<String>()
                .to_ascii_lowercase();
            let value = value.trim();

            match canon.as_str() {
                "server" | "host" | "datasource" => {
                    settings.hosts = value
                        .split(',')
                        .map(|h| h.trim().to_string())
                        .filter(|h| !h.is_empty())
                        .collect();
                }
                "port" => {
                    settings.port = value.parse().map_err(|_| {
                        PoolError::Configuration(format!("invalid port: {value}"))
                    })?;
                }
                "userid" | "uid" | "user" | "username" => {
                    settings.user = value.to_string();
                }
                "password" | "pwd" => {
                    settings.password = value.to_string();
                }
                "database" | "initialcatalog" => {
                    settings.database = Some(value.to_string());
                }
                "applicationname" | "app" => {
                    settings.application_name = Some(value.to_string());
                }
                "pooling" => {
                    settings.pooling = parse_bool("Pooling", value)?;
                }
                "minimumpoolsize" | "minpoolsize" => {
                    settings.minimum_pool_size = parse_u32("MinimumPoolSize", value)?;
                }
                "maximumpoolsize" | "maxpoolsize" => {
                    settings.maximum_pool_size = parse_u32("MaximumPoolSize", value)?;
                }
                "connectionlifetime" => {
                    let ms = parse_u32("ConnectionLifeTime", value)?;
                    settings.connection_lifetime = Duration::from_millis(u64::from(ms));
                }
                "connectionidletimeout" => {
                    let secs = parse_u32("ConnectionIdleTimeout", value)?;
                    settings.idle_timeout = Duration::from_secs(u64::from(secs));
                }
                "connectionreset" => {
                    settings.connection_reset = parse_bool("ConnectionReset", value)?;
                }
                "connectionprotocol" | "protocol" => {
                    settings.protocol = Protocol::parse(value).ok_or_else(|| {
                        PoolError::Configuration(format!("invalid protocol: {value}"))
                    })?;
                }
                "loadbalance" => {
                    settings.load_balance = LoadBalancePolicy::parse(value).ok_or_else(|| {
                        PoolError::Configuration(format!("invalid load balance policy: {value}"))
                    })?;
                }
                "serverredirectionmode" => {
                    settings.redirection_mode =
                        RedirectionMode::parse(value).ok_or_else(|| {
                            PoolError::Configuration(format!(
                                "invalid server redirection mode: {value}"
                            ))
                        })?;
                }
                "dnscheckinterval" => {
                    let secs = parse_u32("DnsCheckInterval", value)?;
                    settings.dns_check_interval = Duration::from_secs(u64::from(secs));
                }
                "connecttimeout" | "connectiontimeout" => {
                    let secs = parse_u32("Connect Timeout", value)?;
                    settings.connect_timeout = Duration::from_secs(u64::from(secs));
                }
                "sslmode" => {
                    settings.tls.mode = TlsMode::parse(value).ok_or_else(|| {
                        PoolError::Configuration(format!("invalid ssl mode: {value}"))
                    })?;
                }
                "sslca" | "cafile" => {
                    settings.tls.ca_file = Some(PathBuf::from(value));
                }
                _ => {
                    tracing::debug!(
                        key = key.trim(),
                        "ignoring unknown connection string option"
                    );
                }
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.hosts.is_empty() {
            return Err(PoolError::Configuration(
                "at least one host is required".to_string(),
            ));
        }
        if self.maximum_pool_size == 0 {
            return Err(PoolError::Configuration(
                "MaximumPoolSize must be at least 1".to_string(),
            ));
        }
        if self.minimum_pool_size > self.maximum_pool_size {
            return Err(PoolError::Configuration(format!(
                "MinimumPoolSize ({}) must not exceed MaximumPoolSize ({})",
                self.minimum_pool_size, self.maximum_pool_size
            )));
        }
        Ok(())
    }

    /// The password, for the transport's handshake.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Canonical form of the connection string.
    ///
    /// Two strings that differ only in option casing, spacing, or order
    /// normalize identically and therefore share a pool. Includes the
    /// password: pools are keyed by full credentials.
    #[must_use]
    pub fn normalized_connection_string(&self) -> String {
        self.render(true)
    }

    /// Human-facing pool name: the application name if configured, else the
    /// normalized connection string with the password omitted.
    #[must_use]
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.application_name {
            return name.clone();
        }
        self.render(false)
    }

    fn render(&self, include_password: bool) -> String {
        use std::fmt::Write as _;

        let mut out = String::with_capacity(128);
        let _ = write!(out, "server={}", self.hosts.join(","));
        let _ = write!(out, ";port={}", self.port);
        let _ = write!(out, ";user id={}", self.user);
        if include_password {
            let _ = write!(out, ";password={}", self.password);
        }
        if let Some(database) = &self.database {
            let _ = write!(out, ";database={database}");
        }
        if let Some(app) = &self.application_name {
            let _ = write!(out, ";application name={app}");
        }
        let _ = write!(out, ";connection protocol={}", self.protocol.as_str());
        let _ = write!(out, ";pooling={}", self.pooling);
        let _ = write!(out, ";minimum pool size={}", self.minimum_pool_size);
        let _ = write!(out, ";maximum pool size={}", self.maximum_pool_size);
        let _ = write!(
            out,
            ";connection lifetime={}",
            self.connection_lifetime.as_millis()
        );
        let _ = write!(
            out,
            ";connection idle timeout={}",
            self.idle_timeout.as_secs()
        );
        let _ = write!(out, ";connection reset={}", self.connection_reset);
        let _ = write!(out, ";load balance={}", self.load_balance.as_str());
        let _ = write!(
            out,
            ";server redirection mode={}",
            self.redirection_mode.as_str()
        );
        let _ = write!(
            out,
            ";dns check interval={}",
            self.dns_check_interval.as_secs()
        );
        let _ = write!(out, ";connect timeout={}", self.connect_timeout.as_secs());
        let _ = write!(out, ";ssl mode={}", self.tls.mode.as_str());
        if let Some(ca) = &self.tls.ca_file {
            let _ = write!(out, ";ssl ca={}", ca.display());
        }
        out
    }

    /// Clone these settings pointed at a redirect target's endpoint.
    #[must_use]
    pub(crate) fn redirected_to(&self, target: &RedirectTarget) -> Self {
        let mut settings = self.clone();
        settings.hosts = vec![target.host.clone()];
        settings.port = target.port;
        settings.user = target.user.clone();
        settings
    }

    /// Set the host list.
    #[must_use]
    pub fn hosts(mut self, hosts: Vec<String>) -> Self {
        self.hosts = hosts;
        self
    }

    /// Set the minimum pool size.
    #[must_use]
    pub fn minimum_pool_size(mut self, size: u32) -> Self {
        self.minimum_pool_size = size;
        self
    }

    /// Set the maximum pool size.
    #[must_use]
    pub fn maximum_pool_size(mut self, size: u32) -> Self {
        self.maximum_pool_size = size;
        self
    }

    /// Set the maximum session age.
    #[must_use]
    pub fn connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.connection_lifetime = lifetime;
        self
    }

    /// Set the idle TTL.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Enable or disable protocol reset on reuse.
    #[must_use]
    pub fn connection_reset(mut self, reset: bool) -> Self {
        self.connection_reset = reset;
        self
    }

    /// Set the host-ordering strategy.
    #[must_use]
    pub fn load_balance(mut self, policy: LoadBalancePolicy) -> Self {
        self.load_balance = policy;
        self
    }

    /// Set the redirection mode.
    #[must_use]
    pub fn redirection_mode(mut self, mode: RedirectionMode) -> Self {
        self.redirection_mode = mode;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let settings = PoolSettings::parse(
            "Server=db.example.com;Port=3307;User Id=app;Password=secret;Database=orders",
        )
        .unwrap();

        assert_eq!(settings.hosts, vec!["db.example.com".to_string()]);
        assert_eq!(settings.port, 3307);
        assert_eq!(settings.user, "app");
        assert_eq!(settings.password(), "secret");
        assert_eq!(settings.database.as_deref(), Some("orders"));
    }

    #[test]
    fn test_parse_multi_host() {
        let settings = PoolSettings::parse("Server=db1, db2 ,db3;User Id=app").unwrap();
        assert_eq!(settings.hosts, vec!["db1", "db2", "db3"]);
    }

    #[test]
    fn test_parse_pool_options() {
        let settings = PoolSettings::parse(
            "Server=db;Minimum Pool Size=3;Maximum Pool Size=7;Connection LifeTime=60000;\
             Connection Idle Timeout=30;Connection Reset=false;Load Balance=least-connections;\
             Server Redirection Mode=required;Dns Check Interval=15",
        )
        .unwrap();

        assert_eq!(settings.minimum_pool_size, 3);
        assert_eq!(settings.maximum_pool_size, 7);
        assert_eq!(settings.connection_lifetime, Duration::from_secs(60));
        assert_eq!(settings.idle_timeout, Duration::from_secs(30));
        assert!(!settings.connection_reset);
        assert_eq!(settings.load_balance, LoadBalancePolicy::LeastConnections);
        assert_eq!(settings.redirection_mode, RedirectionMode::Required);
        assert_eq!(settings.dns_check_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_parse_key_canonicalization() {
        let a = PoolSettings::parse("Server=db;MAXIMUMPOOLSIZE=5").unwrap();
        let b = PoolSettings::parse("server=db;Maximum Pool Size=5").unwrap();
        assert_eq!(
            a.normalized_connection_string(),
            b.normalized_connection_string()
        );
    }

    #[test]
    fn test_parse_rejects_min_above_max() {
        let err = PoolSettings::parse("Server=db;MinimumPoolSize=9;MaximumPoolSize=2");
        assert!(matches!(err, Err(PoolError::Configuration(_))));
    }

    #[test]
    fn test_parse_rejects_zero_max() {
        let err = PoolSettings::parse("Server=db;MaximumPoolSize=0");
        assert!(matches!(err, Err(PoolError::Configuration(_))));
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let settings = PoolSettings::parse("Server=db;User Id=u;Password=p;Pooling=true").unwrap();
        let normalized = settings.normalized_connection_string();
        let reparsed = PoolSettings::parse(&normalized).unwrap();
        assert_eq!(reparsed.normalized_connection_string(), normalized);
    }

    #[test]
    fn test_display_name_omits_password() {
        let settings =
            PoolSettings::parse("Server=db;User Id=app;Password=hunter2").unwrap();
        assert!(!settings.display_name().contains("hunter2"));
        assert!(settings
            .normalized_connection_string()
            .contains("password=hunter2"));
    }

    #[test]
    fn test_display_name_prefers_application_name() {
        let settings =
            PoolSettings::parse("Server=db;Application Name=billing-pool").unwrap();
        assert_eq!(settings.display_name(), "billing-pool");
    }

    #[test]
    fn test_debug_hides_password() {
        let settings = PoolSettings::parse("Server=db;Password=hunter2").unwrap();
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_unknown_options_ignored() {
        let settings = PoolSettings::parse("Server=db;SomeFutureOption=42").unwrap();
        assert_eq!(settings.hosts, vec!["db"]);
    }
}
