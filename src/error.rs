//! Error types. Transport failures from the control protocol, capture lifecycle
//! failures, and the per-run / per-batch errors built on top of them.

use std::path::PathBuf;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Transport-level failure talking to a device.
///
/// Non-success status codes are never turned into an `EcpError`; they are
/// returned to the caller inside a [`ControlResponse`](crate::device_control::ControlResponse).
#[derive(Debug, Error)]
pub enum EcpError {
    /// Connection refused, timeout, broken body, etc.
    #[error("ECP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid ECP url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A success response whose body could not be decoded.
    #[error("malformed ECP response: {message}")]
    MalformedResponse { message: String, body: String },
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture already started, can't start again")]
    AlreadyStarted,

    #[error("cannot stop a capture that was never started")]
    NotStarted,

    #[error("failed to open capture on interface '{interface}'")]
    Open {
        interface: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to open capture output file {}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    /// Raised inside the drain worker; logged, never returned from `stop()`.
    #[error("capture drain failed")]
    Drain(#[source] BoxError),
}

/// Reason an exercise run was abandoned.
#[derive(Debug, Error)]
pub enum ExerciseError {
    #[error("packet capture failed")]
    Capture(#[from] CaptureError),

    #[error("device control request failed")]
    Control(#[from] EcpError),

    #[error("exercise interrupted by cancellation")]
    Interrupted,

    #[error("output directory {} is unusable", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure recorded against a single app id during an install batch.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Control(#[from] EcpError),

    #[error("install attempt interrupted by cancellation")]
    Interrupted,
}

/// The install batch ran, but its outcome could not be determined.
///
/// Distinct from "some apps failed to install", which is reported through
/// [`InstallReport`](crate::installer::InstallReport)s.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("installation summary unavailable: could not query installed apps")]
    ReportsUnavailable {
        #[source]
        source: EcpError,
    },

    #[error("installation summary unavailable: installed apps query returned HTTP {status}")]
    ListingRejected { status: u16 },
}

/// The installed apps listing that seeds an exercise batch was unavailable.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("could not get list of installed apps")]
    Listing(#[from] EcpError),

    #[error("query for installed apps failed with HTTP {status}")]
    ListingRejected { status: u16 },
}

impl InstallError {
    /// Every variant means the per-app outcome is unknown.
    pub fn is_reports_unavailable(&self) -> bool {
        matches!(
            self,
            InstallError::ReportsUnavailable { .. } | InstallError::ListingRejected { .. }
        )
    }
}

/// Render an error and its full `source()` chain, one cause per line.
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        out.push_str("\nCaused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
