//! Discovered device handle. Wraps the base control URL that every ECP request
//! is built from, plus the metadata SSDP reported for it.

use std::fmt;
use std::net::IpAddr;

use url::Url;

use crate::error::EcpError;

/// A reachable device. Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    base_url: Url,
    pub server: Option<String>,
    pub usn: Option<String>,
}

impl Device {
    /// Build a device from the SSDP `LOCATION` header (or any base URL).
    ///
    /// The path is normalized to end in `/` so operation paths join beneath it.
    pub fn from_location(location: &str) -> Result<Self, EcpError> {
        let mut base_url = Url::parse(location)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        base_url.set_query(None);
        base_url.set_fragment(None);

        Ok(Self {
            base_url,
            server: None,
            usn: None,
        })
    }

    /// Device at `ip` on the given control port.
    pub fn from_ip(ip: IpAddr, port: u16) -> Result<Self, EcpError> {
        let host = match ip {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => format!("[{}]", v6),
        };
        Self::from_location(&format!("http://{}:{}/", host, port))
    }

    pub fn with_server(mut self, server: Option<String>) -> Self {
        self.server = server.filter(|s| !s.is_empty());
        self
    }

    pub fn with_usn(mut self, usn: Option<String>) -> Self {
        self.usn = usn.filter(|s| !s.is_empty());
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a user-supplied target: a bare IP address gets the configured
    /// control `port`, anything else must be a full base URL.
    pub fn from_target(target: &str, port: u16) -> Result<Self, EcpError> {
        match target.trim().parse::<IpAddr>() {
            Ok(ip) => Self::from_ip(ip, port),
            Err(_) => Self::from_location(target.trim()),
        }
    }

    /// `{base}/{operation_path}`
    pub fn endpoint(&self, operation_path: &str) -> Result<Url, EcpError> {
        Ok(self.base_url.join(operation_path.trim_start_matches('/'))?)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_url)?;
        if let Some(server) = &self.server {
            write!(f, " ({})", server)?;
        }
        Ok(())
    }
}
