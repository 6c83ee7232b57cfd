//! Endpoint URLs and wire protocols.
//!
//! An endpoint is one concrete, addressable instance of a logical service:
//!
//! ```text
//! plain://127.0.0.1:9876/Framework/Hello
//! token://rm.example.org:9143/RequestManagement/ReqManager
//! 10.0.0.7:9876
//! ```
//!
//! The path is informational; a bare `host:port` uses [`DEFAULT_PROTOCOL`].

use std::fmt;
use std::str::FromStr;

use crate::protocol::error::{Result, RpcError};

/// Connection-level protocol spoken on a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// No handshake; the peer is anonymous.
    Plain,
    /// The client opens with a shared-token handshake.
    Token,
}

/// Process-wide default protocol.
pub const DEFAULT_PROTOCOL: Protocol = Protocol::Plain;

impl Protocol {
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Plain => "plain",
            Protocol::Token => "token",
        }
    }

    pub fn has_handshake(&self) -> bool {
        matches!(self, Protocol::Token)
    }
}

impl FromStr for Protocol {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" => Ok(Protocol::Plain),
            "token" => Ok(Protocol::Token),
            other => Err(RpcError::InvalidEndpoint(format!("unknown protocol '{}'", other))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A parsed endpoint URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    protocol: Protocol,
    /// `host:port`
    address: String,
    /// `System/Service`, when the URL carries one
    service: Option<String>,
}

impl Endpoint {
    pub fn new(protocol: Protocol, address: impl Into<String>) -> Self {
        Self {
            protocol,
            address: address.into(),
            service: None,
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Parses `[protocol://]host:port[/System/Service]`.
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        let (protocol, rest) = match url.split_once("://") {
            Some((scheme, rest)) => (scheme.parse::<Protocol>()?, rest),
            None => (DEFAULT_PROTOCOL, url),
        };

        let (address, path) = match rest.split_once('/') {
            Some((address, path)) => (address, Some(path.trim_matches('/'))),
            None => (rest, None),
        };

        let valid_port = address
            .rsplit_once(':')
            .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
            .unwrap_or(false);
        if !valid_port {
            return Err(RpcError::InvalidEndpoint(url.to_string()));
        }

        Ok(Self {
            protocol,
            address: address.to_string(),
            service: path.filter(|p| !p.is_empty()).map(str::to_string),
        })
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    /// Full URL form, used as the key for cached connections.
    pub fn url(&self) -> String {
        self.to_string()
    }
}

impl FromStr for Endpoint {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self> {
        Endpoint::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.address)?;
        if let Some(service) = &self.service {
            write!(f, "/{}", service)?;
        }
        Ok(())
    }
}

/// Parses a comma-separated URL list, skipping blanks.
pub fn parse_endpoint_list(list: &str) -> Result<Vec<Endpoint>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Endpoint::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_url() {
        let ep = Endpoint::parse("token://rm.example.org:9143/RequestManagement/ReqManager").unwrap();
        assert_eq!(ep.protocol(), Protocol::Token);
        assert_eq!(ep.address(), "rm.example.org:9143");
        assert_eq!(ep.service(), Some("RequestManagement/ReqManager"));
        assert_eq!(ep.url(), "token://rm.example.org:9143/RequestManagement/ReqManager");
    }

    #[test]
    fn test_parse_bare_address_uses_default_protocol() {
        let ep = Endpoint::parse("127.0.0.1:9876").unwrap();
        assert_eq!(ep.protocol(), DEFAULT_PROTOCOL);
        assert_eq!(ep.service(), None);
        assert_eq!(ep.to_string(), "plain://127.0.0.1:9876");
    }

    #[test]
    fn test_parse_rejects_bad_urls() {
        assert!(Endpoint::parse("plain://nohost").is_err());
        assert!(Endpoint::parse("plain://:9876").is_err());
        assert!(Endpoint::parse("plain://host:notaport").is_err());
        assert!(Endpoint::parse("ftp://host:21").is_err());
    }

    #[test]
    fn test_protocol_names() {
        assert_eq!("TOKEN".parse::<Protocol>().unwrap(), Protocol::Token);
        assert!(Protocol::Token.has_handshake());
        assert!(!Protocol::Plain.has_handshake());
    }

    #[test]
    fn test_parse_endpoint_list() {
        let eps = parse_endpoint_list(" plain://a:1/S/X , ,b:2").unwrap();
        assert_eq!(eps.len(), 2);
        assert_eq!(eps[1].address(), "b:2");
    }
}
