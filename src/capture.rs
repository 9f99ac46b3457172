//! Packet capture sessions. A session binds a live capture on one interface,
//! drains frames to a pcap file on a blocking worker, and is stopped through a
//! shared flag that the worker checks at every read-timeout boundary.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pcap::{Active, Capture, Savefile};
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::config::CaptureConfig;
use crate::error::CaptureError;

/// Source of frames bound to an output file.
pub trait FrameSource: Send {
    /// Read at most one frame and persist it. `Ok(false)` means the read timed
    /// out with nothing to write.
    fn pump(&mut self) -> Result<bool, CaptureError>;

    /// Flush and release the output.
    fn finish(&mut self) -> Result<(), CaptureError>;
}

/// Opens frame sources. Opening must create (or truncate) the output file and
/// fail synchronously when the interface can't be captured on.
pub trait CaptureBackend: Send + Sync {
    fn open(&self, interface: &str, output: &Path) -> Result<Box<dyn FrameSource>, CaptureError>;
}

/// libpcap-backed live capture
#[derive(Debug, Clone, Default)]
pub struct PcapBackend {
    config: CaptureConfig,
}

impl PcapBackend {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }
}

impl CaptureBackend for PcapBackend {
    fn open(&self, interface: &str, output: &Path) -> Result<Box<dyn FrameSource>, CaptureError> {
        let open_err = |e: pcap::Error| CaptureError::Open {
            interface: interface.to_string(),
            source: Box::new(e),
        };

        let capture = Capture::from_device(interface)
            .map_err(open_err)?
            .promisc(self.config.promiscuous)
            .snaplen(self.config.snaplen)
            .timeout(self.config.read_timeout_ms)
            .open()
            .map_err(open_err)?;

        let savefile = capture.savefile(output).map_err(|e| CaptureError::Output {
            path: output.to_path_buf(),
            source: Box::new(e),
        })?;

        Ok(Box::new(PcapSource { capture, savefile }))
    }
}

struct PcapSource {
    capture: Capture<Active>,
    savefile: Savefile,
}

impl FrameSource for PcapSource {
    fn pump(&mut self) -> Result<bool, CaptureError> {
        match self.capture.next_packet() {
            Ok(packet) => {
                self.savefile.write(&packet);
                Ok(true)
            }
            Err(pcap::Error::TimeoutExpired) => Ok(false),
            Err(e) => Err(CaptureError::Drain(Box::new(e))),
        }
    }

    fn finish(&mut self) -> Result<(), CaptureError> {
        self.savefile
            .flush()
            .map_err(|e| CaptureError::Drain(Box::new(e)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    NotStarted,
    Active,
    Stopped,
}

/// One capture run. Use once: a stopped (or failed) session can't be restarted.
pub struct CaptureSession<'a> {
    backend: &'a dyn CaptureBackend,
    interface: Option<String>,
    state: CaptureState,
    attempted: bool,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<u64>>,
}

impl<'a> CaptureSession<'a> {
    pub fn new(backend: &'a dyn CaptureBackend) -> Self {
        Self {
            backend,
            interface: None,
            state: CaptureState::NotStarted,
            attempted: false,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Open the capture and spawn the drain worker. Must be called from
    /// within a Tokio runtime.
    pub fn start(&mut self, interface: &str, output: &Path) -> Result<(), CaptureError> {
        if self.attempted {
            return Err(CaptureError::AlreadyStarted);
        }
        self.attempted = true;
        self.interface = Some(interface.to_string());

        let source = self.backend.open(interface, output)?;

        let stop = self.stop.clone();
        let label = interface.to_string();
        self.worker = Some(task::spawn_blocking(move || drain(source, stop, &label)));
        self.state = CaptureState::Active;

        info!(interface, output = %output.display(), "capture started");
        Ok(())
    }

    /// Ask the worker to exit. Returns immediately; use [`join`](Self::join)
    /// to wait for the output to be flushed.
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        match self.state {
            CaptureState::NotStarted => Err(CaptureError::NotStarted),
            CaptureState::Stopped => Ok(()),
            CaptureState::Active => {
                self.stop.store(true, Ordering::Release);
                self.state = CaptureState::Stopped;
                debug!(interface = ?self.interface, "capture marked for termination");
                Ok(())
            }
        }
    }

    /// True once started, including after `stop()` was requested.
    pub fn is_active(&self) -> bool {
        matches!(self.state, CaptureState::Active | CaptureState::Stopped)
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Wait for the drain worker to exit. Returns the number of frames
    /// written, or `None` if there is no worker to join.
    pub async fn join(&mut self) -> Option<u64> {
        let worker = self.worker.take()?;
        match worker.await {
            Ok(frames) => {
                info!(interface = ?self.interface, frames, "capture finished");
                Some(frames)
            }
            Err(e) => {
                error!(error = %e, "capture worker panicked");
                None
            }
        }
    }
}

impl Drop for CaptureSession<'_> {
    fn drop(&mut self) {
        // Never leave a worker draining after its owner is gone.
        self.stop.store(true, Ordering::Release);
    }
}

fn drain(mut source: Box<dyn FrameSource>, stop: Arc<AtomicBool>, interface: &str) -> u64 {
    let mut frames = 0u64;
    while !stop.load(Ordering::Acquire) {
        match source.pump() {
            Ok(true) => frames += 1,
            Ok(false) => {}
            Err(e) => {
                error!(interface, error = %crate::error::error_chain(&e), "capture drain aborted");
                break;
            }
        }
    }
    if let Err(e) = source.finish() {
        warn!(interface, error = %crate::error::error_chain(&e), "failed to flush capture output");
    }
    frames
}
