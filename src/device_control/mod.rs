mod client;
mod roku;
mod types;

pub use client::DeviceControl;
pub use roku::{RokuEcpClient, parse_app_list};
pub use types::{AppDescriptor, ControlResponse, RemoteKey};
