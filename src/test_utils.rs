use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};

use crate::capture::{CaptureBackend, FrameSource};
use crate::device_control::{AppDescriptor, ControlResponse, DeviceControl, RemoteKey};
use crate::error::{CaptureError, EcpError};

/// Ordered record of everything the stubs saw, shared between the fake
/// device and the fake capture so relative ordering can be asserted.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Events produced by device control calls only.
    pub fn control_calls(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| !e.starts_with("capture-"))
            .collect()
    }
}

pub fn app(id: u32, name: &str) -> AppDescriptor {
    AppDescriptor {
        id,
        name: name.to_string(),
        app_type: "appl".to_string(),
        subtype: "ndka".to_string(),
        version: "1.0.0".to_string(),
    }
}

fn simulated_transport_error(call: usize) -> EcpError {
    EcpError::MalformedResponse {
        message: format!("simulated transport failure on call {}", call),
        body: String::new(),
    }
}

#[derive(Default)]
struct StubState {
    calls: usize,
    installed: BTreeSet<u32>,
    last_install_request: Option<u32>,
    pending_install: Option<(u32, usize)>,
    statuses: HashMap<String, VecDeque<u16>>,
}

/// Scripted in-memory device.
///
/// Every call is appended to the [`EventLog`] as `launch N`, `key TOKEN`,
/// `install N` or `query apps`.
pub struct StubDevice {
    log: EventLog,
    state: Mutex<StubState>,
    failing_calls: HashSet<usize>,
    installable: HashMap<u32, usize>,
}

impl StubDevice {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            state: Mutex::new(StubState::default()),
            failing_calls: HashSet::new(),
            installable: HashMap::new(),
        }
    }

    /// Raise a transport error on the given 1-based call number.
    pub fn fail_on_call(mut self, call: usize) -> Self {
        self.failing_calls.insert(call);
        self
    }

    /// Queue statuses returned for an event, e.g. `("key select", [503])`.
    /// Once the queue is empty the event succeeds.
    pub fn with_statuses(self, event: &str, statuses: &[u16]) -> Self {
        self.state
            .lock()
            .unwrap()
            .statuses
            .entry(event.to_string())
            .or_default()
            .extend(statuses.iter().copied());
        self
    }

    pub fn with_installed(self, ids: &[u32]) -> Self {
        self.state.lock().unwrap().installed.extend(ids.iter().copied());
        self
    }

    /// Accepting the install of `id` makes it appear after `listings` more
    /// `query apps` calls.
    pub fn installs_after(mut self, id: u32, listings: usize) -> Self {
        self.installable.insert(id, listings);
        self
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    fn record(&self, event: String) -> Result<u16, EcpError> {
        let call = {
            let mut state = self.state.lock().unwrap();
            state.calls += 1;
            state.calls
        };
        self.log.push(event.clone());
        if self.failing_calls.contains(&call) {
            return Err(simulated_transport_error(call));
        }
        Ok(self.next_status(&event))
    }

    fn next_status(&self, event: &str) -> u16 {
        let mut state = self.state.lock().unwrap();
        state
            .statuses
            .get_mut(event)
            .and_then(VecDeque::pop_front)
            .unwrap_or(200)
    }
}

#[async_trait]
impl DeviceControl for StubDevice {
    async fn send_key(&self, key: RemoteKey) -> Result<ControlResponse, EcpError> {
        let status = self.record(format!("key {}", key.url_token()))?;
        if key == RemoteKey::Select && status == 200 {
            let mut state = self.state.lock().unwrap();
            if let Some(id) = state.last_install_request.take()
                && let Some(&listings) = self.installable.get(&id)
            {
                state.pending_install = Some((id, listings));
            }
        }
        Ok(ControlResponse::with_status(status))
    }

    async fn launch_app(&self, app_id: u32) -> Result<ControlResponse, EcpError> {
        let status = self.record(format!("launch {}", app_id))?;
        Ok(ControlResponse::with_status(status))
    }

    async fn request_install(&self, app_id: u32) -> Result<ControlResponse, EcpError> {
        let status = self.record(format!("install {}", app_id))?;
        let mut state = self.state.lock().unwrap();
        state.last_install_request = if status == 200 && !state.installed.contains(&app_id) {
            Some(app_id)
        } else {
            None
        };
        Ok(ControlResponse::with_status(status))
    }

    async fn list_installed_apps(
        &self,
    ) -> Result<ControlResponse<Vec<AppDescriptor>>, EcpError> {
        let status = self.record("query apps".to_string())?;
        let mut state = self.state.lock().unwrap();
        if let Some((id, remaining)) = state.pending_install {
            if remaining == 0 {
                state.installed.insert(id);
                state.pending_install = None;
            } else {
                state.pending_install = Some((id, remaining - 1));
            }
        }
        let apps = state
            .installed
            .iter()
            .map(|&id| app(id, &format!("App {}", id)))
            .collect();
        Ok(ControlResponse {
            status,
            reason: None,
            headers: IndexMap::new(),
            body: String::new(),
            parsed: (status == 200).then_some(apps),
        })
    }
}

/// Capture backend that never touches a real interface. Writes `frames`
/// synthetic Ethernet frames to a pcap file, then idles until stopped.
pub struct FakeCaptureBackend {
    log: EventLog,
    fail_open: bool,
    frames: usize,
}

impl FakeCaptureBackend {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            fail_open: false,
            frames: 0,
        }
    }

    pub fn failing(log: EventLog) -> Self {
        Self {
            fail_open: true,
            ..Self::new(log)
        }
    }

    pub fn with_frames(mut self, frames: usize) -> Self {
        self.frames = frames;
        self
    }
}

impl CaptureBackend for FakeCaptureBackend {
    fn open(&self, interface: &str, output: &Path) -> Result<Box<dyn FrameSource>, CaptureError> {
        if self.fail_open {
            return Err(CaptureError::Open {
                interface: interface.to_string(),
                source: "No such device exists".into(),
            });
        }
        let output_err = |e: Box<dyn std::error::Error + Send + Sync>| CaptureError::Output {
            path: output.to_path_buf(),
            source: e,
        };
        let file = File::create(output).map_err(|e| output_err(Box::new(e)))?;
        let writer = PcapWriter::with_header(
            file,
            PcapHeader {
                datalink: pcap_file::DataLink::ETHERNET,
                ..Default::default()
            },
        )
        .map_err(|e| output_err(Box::new(e)))?;

        self.log.push(format!("capture-start {}", interface));
        Ok(Box::new(FakeSource {
            log: self.log.clone(),
            writer,
            remaining: self.frames,
        }))
    }
}

struct FakeSource {
    log: EventLog,
    writer: PcapWriter<File>,
    remaining: usize,
}

impl FrameSource for FakeSource {
    fn pump(&mut self) -> Result<bool, CaptureError> {
        if self.remaining == 0 {
            std::thread::sleep(Duration::from_millis(1));
            return Ok(false);
        }
        self.remaining -= 1;
        let frame = [0u8; 60];
        let packet = PcapPacket::new(Duration::from_secs(1_700_000_000), 60, &frame);
        self.writer
            .write_packet(&packet)
            .map_err(|e| CaptureError::Drain(Box::new(e)))?;
        Ok(true)
    }

    fn finish(&mut self) -> Result<(), CaptureError> {
        self.log.push("capture-stop");
        Ok(())
    }
}
