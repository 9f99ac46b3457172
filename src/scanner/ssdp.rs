//! SSDP discovery of ECP-capable devices. Sends a multicast M-SEARCH for the
//! `roku:ecp` search target and turns each response into a [`Device`].

use std::time::Duration;

use futures::StreamExt;
use ssdp_client::SearchTarget;
use tracing::{debug, warn};

use crate::device::Device;

/// One SSDP response, before it is turned into a [`Device`].
#[derive(Debug, Clone)]
pub struct SsdpResult {
    pub location: String,
    pub server: Option<String>,
    pub usn: Option<String>,
}

/// SSDP scanner for devices answering the ECP search target
pub struct EcpScanner {
    timeout: Duration,
    search_target: SearchTarget,
}

impl EcpScanner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            search_target: SearchTarget::Custom("roku".to_string(), "ecp".to_string()),
        }
    }

    /// Discover devices on the local network.
    ///
    /// An empty list is a normal outcome; only socket-level failures are errors.
    pub async fn discover(&self) -> Result<Vec<Device>, ssdp_client::Error> {
        let mut results = Vec::new();
        let mut responses = ssdp_client::search(&self.search_target, self.timeout, 2, None).await?;

        while let Some(response_result) = responses.next().await {
            match response_result {
                Ok(response) => {
                    debug!(location = response.location(), "SSDP response");
                    results.push(SsdpResult {
                        location: response.location().to_string(),
                        server: Some(response.server().to_string()),
                        usn: Some(response.usn().to_string()),
                    });
                }
                Err(e) => warn!(error = %e, "ignoring unparseable SSDP response"),
            }
        }

        Ok(Self::into_devices(results))
    }

    /// Convert raw responses to devices, dropping bad locations and
    /// deduplicating by control URL (the same device may respond multiple times).
    pub fn into_devices(results: Vec<SsdpResult>) -> Vec<Device> {
        let mut devices: Vec<Device> = results
            .into_iter()
            .filter_map(|r| match Device::from_location(&r.location) {
                Ok(device) => Some(device.with_server(r.server).with_usn(r.usn)),
                Err(e) => {
                    warn!(location = %r.location, error = %e, "skipping device with bad location");
                    None
                }
            })
            .collect();

        devices.sort_by(|a, b| a.base_url().as_str().cmp(b.base_url().as_str()));
        devices.dedup_by(|a, b| a.base_url() == b.base_url());
        devices
    }
}

impl Default for EcpScanner {
    fn default() -> Self {
        Self::new(crate::config::discovery_timeout())
    }
}
