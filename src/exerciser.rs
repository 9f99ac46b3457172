//! Scripted app exerciser. Drives one app through a fixed, timed sequence of
//! remote-control calls while its traffic is captured to `app-N.pcap`.
//!
//! The default script assumes the common layout convention: the first hero
//! item is pre-selected, content grids extend down and right, and a
//! persistent menu sits on the left side, so navigation never goes left.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::capture::{CaptureBackend, CaptureSession};
use crate::config::ScriptTimings;
use crate::device_control::{AppDescriptor, ControlResponse, DeviceControl, RemoteKey};
use crate::error::{ExerciseError, error_chain};
use crate::report::{OutputLayout, append_http_failure, write_error_report};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Launch the app under test.
    Launch { note: String },
    Key { key: RemoteKey, note: String },
    Wait(Duration),
}

/// Ordered list of steps. No branching, no retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExerciseScript {
    steps: Vec<Step>,
    key_counts: HashMap<RemoteKey, u32>,
    launches: u32,
    relaunches: u32,
}

impl ExerciseScript {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            key_counts: HashMap::new(),
            launches: 0,
            relaunches: 0,
        }
    }

    /// Launch, play the hero item, then relaunch twice to reach two more
    /// pieces of content, and finally return to the device home screen.
    pub fn standard(t: &ScriptTimings) -> Self {
        Self::new()
            .launch()
            .wait(t.launch_settle)
            .key(RemoteKey::Select)
            .wait(t.playback)
            .relaunch(t)
            .navigate(&[RemoteKey::Down, RemoteKey::Down, RemoteKey::Right, RemoteKey::Right], t)
            .key(RemoteKey::Select)
            .wait(t.playback)
            .relaunch(t)
            .navigate(&[RemoteKey::Down, RemoteKey::Down], t)
            .key(RemoteKey::Select)
            .wait(t.playback)
            .key_with_note(RemoteKey::Home, "Quit (go to home screen)")
            .wait(t.final_settle)
    }

    pub fn launch(mut self) -> Self {
        self.launches += 1;
        let note = format!("launch #{}.", self.launches);
        self.steps.push(Step::Launch { note });
        self
    }

    /// Press `key`, noted as e.g. `SELECT #2`.
    pub fn key(mut self, key: RemoteKey) -> Self {
        let count = self.key_counts.entry(key).or_insert(0);
        *count += 1;
        let note = format!("{} #{}", key.name(), count);
        self.steps.push(Step::Key { key, note });
        self
    }

    pub fn key_with_note(mut self, key: RemoteKey, note: &str) -> Self {
        self.steps.push(Step::Key {
            key,
            note: note.to_string(),
        });
        self
    }

    pub fn wait(mut self, duration: Duration) -> Self {
        self.steps.push(Step::Wait(duration));
        self
    }

    /// HOME, wait, launch again, wait: back to the app's top-level view.
    pub fn relaunch(mut self, t: &ScriptTimings) -> Self {
        self.relaunches += 1;
        let note = format!("part of relaunch #{} keypress sequence", self.relaunches);
        self.steps.push(Step::Key {
            key: RemoteKey::Home,
            note: note.clone(),
        });
        self.steps.push(Step::Wait(t.home_settle));
        self.steps.push(Step::Launch { note });
        self.steps.push(Step::Wait(t.launch_settle));
        self
    }

    /// Each key followed by a short navigation pause.
    pub fn navigate(self, keys: &[RemoteKey], t: &ScriptTimings) -> Self {
        keys.iter()
            .fold(self, |script, &key| script.key(key).wait(t.nav_step))
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Number of control calls the script makes.
    pub fn call_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| !matches!(s, Step::Wait(_)))
            .count()
    }
}

impl Default for ExerciseScript {
    fn default() -> Self {
        Self::standard(&ScriptTimings::default())
    }
}

/// Result of a completed exercise run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExerciseSummary {
    pub app_id: u32,
    /// Control calls that came back with a non-success status.
    pub http_failures: usize,
    /// Frames written by the capture worker, if it was joined cleanly.
    pub frames: Option<u64>,
}

/// Exercises apps one at a time on one device.
pub struct AppExerciser<'a> {
    control: &'a dyn DeviceControl,
    capture: &'a dyn CaptureBackend,
    base_dir: PathBuf,
    interface: String,
    script: ExerciseScript,
    cancel: CancellationToken,
}

impl<'a> AppExerciser<'a> {
    pub fn new(
        control: &'a dyn DeviceControl,
        capture: &'a dyn CaptureBackend,
        base_dir: impl Into<PathBuf>,
        interface: impl Into<String>,
    ) -> Self {
        Self {
            control,
            capture,
            base_dir: base_dir.into(),
            interface: interface.into(),
            script: ExerciseScript::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_script(mut self, script: ExerciseScript) -> Self {
        self.script = script;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the script against `app` with a fresh capture session.
    ///
    /// On failure the error has already been written to
    /// `app-N-error-report.txt`. The capture is stopped and joined on every
    /// path out of this function.
    pub async fn exercise(&self, app: &AppDescriptor) -> Result<ExerciseSummary, ExerciseError> {
        let layout =
            OutputLayout::prepare(&self.base_dir).map_err(|source| ExerciseError::OutputDir {
                path: self.base_dir.clone(),
                source,
            })?;

        let mut session = CaptureSession::new(self.capture);
        let mut http_failures = 0;
        let result = self
            .run_script(app, &layout, &mut session, &mut http_failures)
            .await;

        if session.is_active()
            && let Err(e) = session.stop()
        {
            warn!(app_id = app.id, error = %e, "failed to stop capture");
        }
        let frames = session.join().await;

        match result {
            Ok(()) => {
                info!(app_id = app.id, http_failures, "exercise complete");
                Ok(ExerciseSummary {
                    app_id: app.id,
                    http_failures,
                    frames,
                })
            }
            Err(e) => {
                error!(app_id = app.id, error = %error_chain(&e), "exercise abandoned");
                let path = layout.error_report_path(app.id);
                if let Err(io) = write_error_report(&path, app, &e) {
                    error!(path = %path.display(), error = %io, "failed to write error report");
                }
                Err(e)
            }
        }
    }

    async fn run_script(
        &self,
        app: &AppDescriptor,
        layout: &OutputLayout,
        session: &mut CaptureSession<'_>,
        http_failures: &mut usize,
    ) -> Result<(), ExerciseError> {
        session.start(&self.interface, &layout.capture_path(app.id))?;

        for step in self.script.steps() {
            let (response, note) = match step {
                Step::Wait(duration) => {
                    self.wait(*duration).await?;
                    continue;
                }
                Step::Launch { note } => (self.control.launch_app(app.id).await?, note),
                Step::Key { key, note } => (self.control.send_key(*key).await?, note),
            };
            if !response.is_success() {
                *http_failures += 1;
                self.log_http_failure(app, layout, &response, note);
            }
        }
        Ok(())
    }

    async fn wait(&self, duration: Duration) -> Result<(), ExerciseError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ExerciseError::Interrupted),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }

    fn log_http_failure(
        &self,
        app: &AppDescriptor,
        layout: &OutputLayout,
        response: &ControlResponse,
        note: &str,
    ) {
        warn!(app_id = app.id, status = response.status, note, "control call failed");
        let path = layout.http_error_report_path(app.id);
        if let Err(e) = append_http_failure(&path, app, response, Some(note)) {
            error!(path = %path.display(), error = %e, "failed to write http error report");
        }
    }
}
