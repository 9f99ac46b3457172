//! Per-app output files inside a base directory: the capture, the fatal error
//! report, and the append-only log of non-success control responses.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::device_control::{AppDescriptor, ControlResponse};
use crate::error::error_chain;

const RULE: &str = "=========================================================";

/// File names for one app id. Re-runs against the same directory reuse them.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    base_dir: PathBuf,
}

impl OutputLayout {
    /// Create `base_dir` if needed. Fails if it exists and is not a directory.
    pub fn prepare(base_dir: impl Into<PathBuf>) -> io::Result<Self> {
        let base_dir = base_dir.into();
        if base_dir.exists() && !base_dir.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "specified base dir is a file",
            ));
        }
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn capture_path(&self, app_id: u32) -> PathBuf {
        self.base_dir.join(format!("app-{}.pcap", app_id))
    }

    pub fn error_report_path(&self, app_id: u32) -> PathBuf {
        self.base_dir.join(format!("app-{}-error-report.txt", app_id))
    }

    pub fn http_error_report_path(&self, app_id: u32) -> PathBuf {
        self.base_dir
            .join(format!("app-{}-http-error-report.txt", app_id))
    }
}

fn app_header(kind: &str, app: &AppDescriptor) -> String {
    format!(
        "{} for '{}' version '{}' (app id: {})",
        kind, app.name, app.version, app.id
    )
}

/// Write (overwriting) the report for a run that had to be abandoned.
pub fn write_error_report(
    path: &Path,
    app: &AppDescriptor,
    error: &(dyn std::error::Error + 'static),
) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "{}", app_header("Error report", app))?;
    writeln!(out)?;
    writeln!(out, "{}", error)?;
    writeln!(out)?;
    writeln!(out, "{}", error_chain(error))?;
    out.flush()
}

/// Append one block describing a non-success response.
///
/// The app header is written only when the file is created by this call.
pub fn append_http_failure<T>(
    path: &Path,
    app: &AppDescriptor,
    response: &ControlResponse<T>,
    note: Option<&str>,
) -> io::Result<()> {
    let file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            writeln!(file, "{}", app_header("HTTP error report", app))?;
            file
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            OpenOptions::new().append(true).open(path)?
        }
        Err(e) => return Err(e),
    };

    let mut out = BufWriter::new(file);
    writeln!(out)?;
    writeln!(out, "{}", RULE)?;
    writeln!(out, "Logged: {}", Local::now().to_rfc3339())?;
    if let Some(note) = note {
        writeln!(out, "Note: {}", note)?;
    }
    writeln!(out)?;
    writeln!(out, "{}", response.status_line())?;
    for (name, values) in &response.headers {
        writeln!(out, "{}: {}", name, values.join(", "))?;
    }
    writeln!(out)?;
    if !response.body.is_empty() {
        writeln!(out, "{}", response.body)?;
    }
    writeln!(out, "{}", RULE)?;
    out.flush()
}
