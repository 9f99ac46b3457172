use async_trait::async_trait;

use super::types::{AppDescriptor, ControlResponse, RemoteKey};
use crate::error::EcpError;

/// Control operations against one bound device.
///
/// Each call is exactly one request/response exchange with no internal retry.
/// `Err` means transport failure only; any HTTP status comes back as `Ok`.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    async fn send_key(&self, key: RemoteKey) -> Result<ControlResponse, EcpError>;

    async fn launch_app(&self, app_id: u32) -> Result<ControlResponse, EcpError>;

    /// Opens the store page for the app. The install itself only starts once
    /// the confirmation on that page is accepted.
    async fn request_install(&self, app_id: u32) -> Result<ControlResponse, EcpError>;

    /// `parsed` is `Some` for success responses only.
    async fn list_installed_apps(&self)
    -> Result<ControlResponse<Vec<AppDescriptor>>, EcpError>;
}
