//! Smart-TV app exerciser. Discovers ECP devices on the local network, drives
//! installed apps through a scripted sequence of remote-control inputs while
//! capturing the device's traffic, and installs apps in bulk.

pub mod capture;
pub mod config;
pub mod device;
pub mod device_control;
pub mod driver;
pub mod error;
pub mod exerciser;
pub mod installer;
pub mod report;
pub mod scanner;

#[cfg(test)]
pub(crate) mod test_utils;

pub use capture::{CaptureBackend, CaptureSession, PcapBackend};
pub use device::Device;
pub use device_control::{AppDescriptor, ControlResponse, DeviceControl, RemoteKey, RokuEcpClient};
pub use exerciser::{AppExerciser, ExerciseScript};
pub use installer::{AppInstaller, InstallReport};
