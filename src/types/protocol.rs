//! Protocol labels exposed at the client boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Wire protocol a router client speaks.
///
/// The core never interprets the label; it stores the user's preferred
/// protocol on the connection status and hands it to the client factory
/// through the connection config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Protocol {
    /// HTTP REST API.
    Rest,
    /// Plaintext binary API.
    Api,
    /// TLS-wrapped binary API.
    ApiSsl,
    /// SSH command channel.
    Ssh,
    /// Telnet command channel.
    Telnet,
}

impl Protocol {
    /// Uppercase boundary tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rest => "REST",
            Self::Api => "API",
            Self::ApiSsl => "API_SSL",
            Self::Ssh => "SSH",
            Self::Telnet => "TELNET",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s {
            "REST" => Ok(Self::Rest),
            "API" => Ok(Self::Api),
            "API_SSL" => Ok(Self::ApiSsl),
            "SSH" => Ok(Self::Ssh),
            "TELNET" => Ok(Self::Telnet),
            other => Err(crate::error::Error::validation(format!(
                "unknown protocol: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_round_trip() {
        for protocol in [
            Protocol::Rest,
            Protocol::Api,
            Protocol::ApiSsl,
            Protocol::Ssh,
            Protocol::Telnet,
        ] {
            assert_eq!(protocol.as_str().parse::<Protocol>().unwrap(), protocol);
        }
        assert!("GOPHER".parse::<Protocol>().is_err());
    }

    #[test]
    fn serializes_as_boundary_tag() {
        assert_eq!(
            serde_json::to_string(&Protocol::ApiSsl).unwrap(),
            "\"API_SSL\""
        );
    }
}
