//! Server redirection header parsing.
//!
//! Some server deployments answer the handshake with a status string telling
//! the client to reconnect to a different endpoint, of the form
//! `Location: mysql://host:port/user=name&ttl=60`.

use crate::config::PoolSettings;

const LOCATION_PREFIX: &str = "Location: mysql://";

/// A parsed redirection target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RedirectTarget {
    /// Host to reconnect to.
    pub host: String,
    /// Port to reconnect to.
    pub port: u16,
    /// User to authenticate as on the new endpoint.
    pub user: String,
    /// Seconds the redirection remains valid, when the server sends one.
    pub ttl: Option<u64>,
}

impl RedirectTarget {
    /// Extract a redirection target from a connect status string.
    ///
    /// The header is only recognized when the status string begins with it;
    /// a `Location:` line buried after other status lines is not a
    /// redirection. Returns `None` when the status carries no redirection
    /// header or the header is malformed; malformed headers are not an
    /// error, the original session is simply kept.
    pub fn parse(status: &str) -> Option<Self> {
        let line = status
            .trim_start()
            .strip_prefix(LOCATION_PREFIX)?
            .lines()
            .next()?
            .trim_end();

        // host[:port]/key=value[&key=value...], host may be bracketed IPv6
        let (endpoint, params) = line.split_once('/')?;

        let (host, port) = if let Some(rest) = endpoint.strip_prefix('[') {
            let (host, after) = rest.split_once(']')?;
            let port = after.strip_prefix(':')?.parse().ok()?;
            (host.to_string(), port)
        } else {
            let (host, port) = endpoint.rsplit_once(':')?;
            (host.to_string(), port.parse().ok()?)
        };
        if host.is_empty() {
            return None;
        }

        let mut user = None;
        let mut ttl = None;
        let params = params.strip_prefix('?').unwrap_or(params);
        for pair in params.split(['&', ';']) {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            match key.trim() {
                "user" => user = Some(value.trim().to_string()),
                "ttl" => ttl = value.trim().parse().ok(),
                _ => {}
            }
        }

        Some(Self {
            host,
            port,
            user: user?,
            ttl,
        })
    }

    /// Whether this target is the endpoint the settings already point at.
    ///
    /// Only the first configured host is compared, as the connect loop tries
    /// hosts in that order.
    pub fn matches_endpoint(&self, settings: &PoolSettings) -> bool {
        settings.hosts.first().is_some_and(|h| *h == self.host)
            && settings.port == self.port
            && settings.user == self.user
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_header() {
        let target =
            RedirectTarget::parse("Location: mysql://db-redirect.example:3307/user=app&ttl=60")
                .unwrap();
        assert_eq!(target.host, "db-redirect.example");
        assert_eq!(target.port, 3307);
        assert_eq!(target.user, "app");
        assert_eq!(target.ttl, Some(60));
    }

    #[test]
    fn test_parse_without_ttl() {
        let target = RedirectTarget::parse("Location: mysql://db2:3306/user=app").unwrap();
        assert_eq!(target.host, "db2");
        assert_eq!(target.ttl, None);
    }

    #[test]
    fn test_parse_ipv6_host() {
        let target = RedirectTarget::parse("Location: mysql://[2001:db8::1]:3306/user=app").unwrap();
        assert_eq!(target.host, "2001:db8::1");
        assert_eq!(target.port, 3306);
    }

    #[test]
    fn test_parse_requires_leading_header() {
        // A Location line after other status lines is not a redirection.
        let status = "Warnings: 0\nLocation: mysql://db2:3306/user=app\n";
        assert!(RedirectTarget::parse(status).is_none());
    }

    #[test]
    fn test_parse_ignores_trailing_status_lines() {
        let status = "Location: mysql://db2:3306/user=app\nWarnings: 0\n";
        let target = RedirectTarget::parse(status).unwrap();
        assert_eq!(target.host, "db2");
        assert_eq!(target.user, "app");
    }

    #[test]
    fn test_parse_rejects_missing_user() {
        assert!(RedirectTarget::parse("Location: mysql://db2:3306/ttl=60").is_none());
    }

    #[test]
    fn test_parse_rejects_plain_status() {
        assert!(RedirectTarget::parse("Query OK").is_none());
        assert!(RedirectTarget::parse("").is_none());
    }

    #[test]
    fn test_matches_endpoint_compares_first_host() {
        let settings = PoolSettings::parse("Server=db1,db2;Port=3306;User Id=app").unwrap();
        let same = RedirectTarget {
            host: "db1".to_string(),
            port: 3306,
            user: "app".to_string(),
            ttl: None,
        };
        let other = RedirectTarget {
            host: "db2".to_string(),
            ..same.clone()
        };
        assert!(same.matches_endpoint(&settings));
        assert!(!other.matches_endpoint(&settings));
    }
}
