//! Per-connection configuration.

use crate::types::Protocol;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default port for the router management API.
pub const DEFAULT_API_PORT: u16 = 8728;

/// Configuration for one managed router connection.
///
/// The core hands the whole config to the [`ClientFactory`] on every connect
/// attempt and every recovery probe; protocol selection details are the
/// factory's business.
///
/// [`ClientFactory`]: crate::client::ClientFactory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Router hostname or address.
    pub host: String,

    /// Management port.
    pub port: u16,

    /// Login user.
    pub username: String,

    /// Login secret.
    pub password: String,

    /// User hint for which protocol the factory should prefer.
    pub preferred_protocol: Option<Protocol>,

    /// Budget for a single connect attempt.
    pub connection_timeout: Duration,

    /// How often the health supervisor pings this router.
    pub health_check_interval: Duration,
}

impl ConnectionConfig {
    /// Config for the given host with all defaults filled in.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Set the login credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the preferred protocol hint.
    pub fn with_preferred_protocol(mut self, protocol: Protocol) -> Self {
        self.preferred_protocol = Some(protocol);
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_API_PORT,
            username: String::new(),
            password: String::new(),
            preferred_protocol: None,
            connection_timeout: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = ConnectionConfig::default();
        assert_eq!(config.port, 8728);
        assert_eq!(config.connection_timeout, Duration::from_secs(30));
        assert_eq!(config.health_check_interval, Duration::from_secs(30));
        assert!(config.preferred_protocol.is_none());
    }

    #[test]
    fn builder_style_setters() {
        let config = ConnectionConfig::new("10.0.0.1")
            .with_credentials("admin", "secret")
            .with_preferred_protocol(Protocol::ApiSsl);
        assert_eq!(config.host, "10.0.0.1");
        assert_eq!(config.username, "admin");
        assert_eq!(config.preferred_protocol, Some(Protocol::ApiSsl));
    }
}
