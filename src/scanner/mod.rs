pub mod ssdp;

pub use ssdp::{EcpScanner, SsdpResult};
