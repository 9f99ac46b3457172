//! Batch driver. Runs the exerciser over every installed app and the installer
//! over an id list, and aggregates per-item outcomes into console summaries.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::device_control::DeviceControl;
use crate::error::BatchError;
use crate::exerciser::AppExerciser;
use crate::installer::InstallReport;

/// Channels that ship hardwired on the device and can't be removed.
pub const DEFAULT_SKIPPED_APPS: &[u32] = &[31012];

/// Aggregate outcome of a batch, by app id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: Vec<u32>,
    pub failed: Vec<u32>,
    pub skipped: Vec<u32>,
}

impl BatchSummary {
    pub fn from_install_reports(reports: &[InstallReport]) -> Self {
        let mut summary = Self::default();
        for report in reports {
            if report.installed {
                summary.succeeded.push(report.app_id);
            } else {
                summary.failed.push(report.app_id);
            }
        }
        summary.failed.sort_unstable();
        summary.succeeded.sort_unstable();
        summary
    }

    pub fn failed_list(&self) -> String {
        self.failed
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed",
            self.succeeded.len(),
            self.failed.len()
        )?;
        if !self.skipped.is_empty() {
            write!(f, ", {} skipped", self.skipped.len())?;
        }
        if !self.failed.is_empty() {
            write!(f, " (failed ids: {})", self.failed_list())?;
        }
        Ok(())
    }
}

/// Exercise every installed app except those in `skip`, one at a time.
///
/// Stops starting new apps once `cancel` fires; apps not reached are
/// reported as skipped.
pub async fn exercise_installed_apps(
    control: &dyn DeviceControl,
    exerciser: &AppExerciser<'_>,
    skip: &HashSet<u32>,
    cancel: &CancellationToken,
) -> Result<BatchSummary, BatchError> {
    let listing = control.list_installed_apps().await?;
    let Some(apps) = listing.parsed.filter(|_| listing.status == 200) else {
        return Err(BatchError::ListingRejected {
            status: listing.status,
        });
    };
    println!("Found {} apps.", apps.len());

    let mut summary = BatchSummary::default();
    for app in &apps {
        if skip.contains(&app.id) || cancel.is_cancelled() {
            summary.skipped.push(app.id);
            continue;
        }
        println!("Exercising {}...", app.name);
        match exerciser.exercise(app).await {
            Ok(_) => summary.succeeded.push(app.id),
            Err(_) => summary.failed.push(app.id),
        }
        println!("Done exercising {}.", app.name);
    }

    info!(%summary, "exercise batch finished");
    Ok(summary)
}

/// App ids read from an id list file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppIdList {
    pub ids: BTreeSet<u32>,
    /// `(line number, line)` for every line that was not an id.
    pub malformed: Vec<(usize, String)>,
}

/// Parse one id per line. `#` lines are comments and blank lines are ignored;
/// anything else that is not an id is warned about and skipped.
pub fn parse_app_id_list(text: &str) -> AppIdList {
    let mut list = AppIdList::default();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match trimmed.parse::<u32>() {
            Ok(id) => {
                list.ids.insert(id);
            }
            Err(_) => {
                warn!(line = idx + 1, content = trimmed, "line could not be parsed as an app id");
                list.malformed.push((idx + 1, line.to_string()));
            }
        }
    }
    list
}
