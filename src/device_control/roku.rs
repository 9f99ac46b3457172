//! Roku ECP client. Implements the External Control Protocol over HTTP for
//! keypresses, app launch/install and the installed apps query.

use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::{Client, Method};
use tracing::debug;

use super::client::DeviceControl;
use super::types::{AppDescriptor, ControlResponse, RemoteKey};
use crate::config::EcpConfig;
use crate::device::Device;
use crate::error::EcpError;

/// Roku External Control Protocol client bound to one device
pub struct RokuEcpClient {
    device: Device,
    http: Client,
}

impl RokuEcpClient {
    pub fn new(device: Device, config: &EcpConfig) -> Result<Self, EcpError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { device, http })
    }

    async fn request(&self, method: Method, path: &str) -> Result<ControlResponse, EcpError> {
        let url = self.device.endpoint(path)?;
        debug!(%method, %url, "ECP request");

        let response = self.http.request(method, url).send().await?;

        let status = response.status();
        let mut headers: IndexMap<String, Vec<String>> = IndexMap::new();
        for (name, value) in response.headers() {
            headers
                .entry(name.as_str().to_string())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
        let body = response.text().await?;

        Ok(ControlResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().map(str::to_string),
            headers,
            body,
            parsed: None,
        })
    }
}

#[async_trait]
impl DeviceControl for RokuEcpClient {
    async fn send_key(&self, key: RemoteKey) -> Result<ControlResponse, EcpError> {
        self.request(Method::POST, &format!("keypress/{}", key.url_token()))
            .await
    }

    async fn launch_app(&self, app_id: u32) -> Result<ControlResponse, EcpError> {
        self.request(Method::POST, &format!("launch/{}", app_id)).await
    }

    async fn request_install(&self, app_id: u32) -> Result<ControlResponse, EcpError> {
        self.request(Method::POST, &format!("install/{}", app_id))
            .await
    }

    async fn list_installed_apps(
        &self,
    ) -> Result<ControlResponse<Vec<AppDescriptor>>, EcpError> {
        let raw = self.request(Method::GET, "query/apps").await?;
        let parsed = if raw.is_success() {
            Some(parse_app_list(&raw.body)?)
        } else {
            None
        };

        Ok(ControlResponse {
            status: raw.status,
            reason: raw.reason,
            headers: raw.headers,
            body: raw.body,
            parsed,
        })
    }
}

/// Parse a `query/apps` document:
/// `<apps><app id="12" type="appl" subtype="ndka" version="4.2.1">Netflix</app>...</apps>`
pub fn parse_app_list(xml: &str) -> Result<Vec<AppDescriptor>, EcpError> {
    let malformed = |message: String| EcpError::MalformedResponse {
        message,
        body: xml.to_string(),
    };

    if !xml.contains("<apps") {
        return Err(malformed("missing <apps> root element".to_string()));
    }

    let mut apps = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<app ") {
        rest = &rest[start + "<app".len()..];
        let tag_end = rest
            .find('>')
            .ok_or_else(|| malformed("unterminated <app> tag".to_string()))?;
        let attrs = &rest[..tag_end];
        rest = &rest[tag_end + 1..];

        let (attrs, name) = if let Some(attrs) = attrs.strip_suffix('/') {
            (attrs, String::new())
        } else {
            let close = rest
                .find("</app>")
                .ok_or_else(|| malformed("missing </app>".to_string()))?;
            let name = decode_entities(rest[..close].trim());
            rest = &rest[close + "</app>".len()..];
            (attrs, name)
        };

        let id_text =
            extract_attr(attrs, "id").ok_or_else(|| malformed("app without id".to_string()))?;
        let id = id_text
            .parse::<u32>()
            .map_err(|_| malformed(format!("invalid app id '{}'", id_text)))?;

        apps.push(AppDescriptor {
            id,
            name,
            app_type: extract_attr(attrs, "type").unwrap_or_default(),
            subtype: extract_attr(attrs, "subtype").unwrap_or_default(),
            version: extract_attr(attrs, "version").unwrap_or_default(),
        });
    }

    Ok(apps)
}

fn extract_attr(attrs: &str, name: &str) -> Option<String> {
    for quote in ['"', '\''] {
        let needle = format!(" {}={}", name, quote);
        if let Some(pos) = attrs.find(&needle) {
            let start = pos + needle.len();
            let end = attrs[start..].find(quote)? + start;
            return Some(decode_entities(&attrs[start..end]));
        }
    }
    None
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
