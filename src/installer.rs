//! Bulk app installation. Requests each install, accepts the on-device
//! confirmation, polls the installed apps listing until the app shows up, and
//! finally reconciles every requested id against one last listing.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::InstallTimings;
use crate::device_control::{DeviceControl, RemoteKey};
use crate::error::{AttemptError, InstallError};

/// Outcome for one requested app id.
#[derive(Debug)]
pub struct InstallReport {
    pub app_id: u32,
    pub installed: bool,
    pub errors: Vec<AttemptError>,
}

impl InstallReport {
    pub fn new(app_id: u32, installed: bool) -> Self {
        Self {
            app_id,
            installed,
            errors: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: AttemptError) {
        self.errors.push(error);
    }
}

/// What the per-id workflow observed before reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    /// The install request or the confirmation keypress was refused.
    Rejected(u16),
    Confirmed,
    TimedOut,
}

/// Installs apps on one device, one at a time.
pub struct AppInstaller<'a> {
    control: &'a dyn DeviceControl,
    timings: InstallTimings,
    cancel: CancellationToken,
}

impl<'a> AppInstaller<'a> {
    pub fn new(control: &'a dyn DeviceControl) -> Self {
        Self {
            control,
            timings: InstallTimings::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_timings(mut self, timings: InstallTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Install every id in `app_ids`, returning one report per id.
    ///
    /// A failure for one id never stops the batch. Only the final
    /// reconciliation query can fail the whole call, in which case the
    /// outcome of the batch is unknown.
    pub async fn install_all(
        &self,
        app_ids: &BTreeSet<u32>,
    ) -> Result<Vec<InstallReport>, InstallError> {
        let mut errors: HashMap<u32, Vec<AttemptError>> = HashMap::new();

        for &app_id in app_ids {
            if self.cancel.is_cancelled() {
                errors
                    .entry(app_id)
                    .or_default()
                    .push(AttemptError::Interrupted);
                continue;
            }
            match self.install_one(app_id).await {
                Ok(Attempt::Confirmed) => info!(app_id, "successfully installed app"),
                Ok(Attempt::TimedOut) => warn!(app_id, "timed out waiting for app to install"),
                Ok(Attempt::Rejected(status)) => {
                    debug!(app_id, status, "install not started")
                }
                Err(e) => {
                    // The app may still have been installed, e.g. when only a poll failed.
                    warn!(app_id, error = %e, "install attempt failed");
                    errors.entry(app_id).or_default().push(e);
                }
            }
        }

        let listing = self
            .control
            .list_installed_apps()
            .await
            .map_err(|source| InstallError::ReportsUnavailable { source })?;
        let Some(installed_apps) = listing.parsed.filter(|_| listing.status == 200) else {
            return Err(InstallError::ListingRejected {
                status: listing.status,
            });
        };
        let installed: HashSet<u32> = installed_apps.iter().map(|a| a.id).collect();

        Ok(app_ids
            .iter()
            .map(|&app_id| {
                if installed.contains(&app_id) {
                    InstallReport::new(app_id, true)
                } else {
                    InstallReport {
                        app_id,
                        installed: false,
                        errors: errors.remove(&app_id).unwrap_or_default(),
                    }
                }
            })
            .collect())
    }

    async fn install_one(&self, app_id: u32) -> Result<Attempt, AttemptError> {
        let response = self.control.request_install(app_id).await?;

        self.pause(self.timings.breather).await?;

        // 503 here usually means already installed or unknown id.
        if !response.is_success() {
            return Ok(Attempt::Rejected(response.status));
        }

        // The store page opens with its add button highlighted.
        let response = self.control.send_key(RemoteKey::Select).await?;
        if !response.is_success() {
            return Ok(Attempt::Rejected(response.status));
        }

        info!(app_id, "installing app");
        let mut waits = 0;
        loop {
            if self.is_installed(app_id).await? {
                return Ok(Attempt::Confirmed);
            }
            if waits >= self.timings.max_polls {
                return Ok(Attempt::TimedOut);
            }
            self.pause(self.timings.poll_interval).await?;
            waits += 1;
        }
    }

    /// Whether the device lists `app_id`. A refused listing counts as not installed.
    async fn is_installed(&self, app_id: u32) -> Result<bool, AttemptError> {
        let listing = self.control.list_installed_apps().await?;
        Ok(listing
            .parsed
            .is_some_and(|apps| apps.iter().any(|a| a.id == app_id)))
    }

    async fn pause(&self, duration: Duration) -> Result<(), AttemptError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(AttemptError::Interrupted),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{EventLog, StubDevice};

    fn ids(ids: &[u32]) -> BTreeSet<u32> {
        ids.iter().copied().collect()
    }

    fn report(reports: &[InstallReport], app_id: u32) -> &InstallReport {
        reports.iter().find(|r| r.app_id == app_id).unwrap()
    }

    fn installer(device: &StubDevice) -> AppInstaller<'_> {
        AppInstaller::new(device).with_timings(InstallTimings::immediate())
    }

    #[tokio::test]
    async fn test_install_confirmed_and_never_appearing() {
        let log = EventLog::default();
        let device = StubDevice::new(log.clone()).installs_after(5, 2);

        let reports = installer(&device).install_all(&ids(&[5, 7])).await.unwrap();

        assert_eq!(reports.len(), 2);
        assert!(report(&reports, 5).installed);
        assert!(!report(&reports, 7).installed);
        assert!(report(&reports, 7).errors.is_empty());

        // App 7: one immediate poll, one per allowed wait, then reconciliation.
        let polls_for_7 = log
            .events()
            .iter()
            .skip_while(|e| *e != "install 7")
            .filter(|e| *e == "query apps")
            .count();
        assert_eq!(polls_for_7, 16 + 1);
    }

    #[tokio::test]
    async fn test_sequence_of_calls_for_one_app() {
        let log = EventLog::default();
        let device = StubDevice::new(log.clone()).installs_after(5, 1);

        installer(&device).install_all(&ids(&[5])).await.unwrap();

        assert_eq!(
            log.events(),
            vec![
                "install 5",
                "key select",
                "query apps",
                "query apps",
                "query apps"
            ]
        );
    }

    #[tokio::test]
    async fn test_rejected_request_skips_confirmation() {
        let log = EventLog::default();
        let device = StubDevice::new(log.clone())
            .with_installed(&[12])
            .with_statuses("install 12", &[503])
            .with_statuses("install 99", &[503]);

        let reports = installer(&device).install_all(&ids(&[12, 99])).await.unwrap();

        assert_eq!(
            log.events(),
            vec!["install 12", "install 99", "query apps"]
        );
        // Already installed before the batch counts as installed.
        assert!(report(&reports, 12).installed);
        assert!(!report(&reports, 99).installed);
    }

    #[tokio::test]
    async fn test_rejected_select_skips_polling() {
        let log = EventLog::default();
        let device = StubDevice::new(log.clone())
            .installs_after(5, 0)
            .with_statuses("key select", &[500]);

        let reports = installer(&device).install_all(&ids(&[5])).await.unwrap();

        assert_eq!(log.events(), vec!["install 5", "key select", "query apps"]);
        assert!(!report(&reports, 5).installed);
    }

    #[tokio::test]
    async fn test_transport_error_is_isolated_per_app() {
        let log = EventLog::default();
        // Call 1 is `install 3`.
        let device = StubDevice::new(log.clone())
            .fail_on_call(1)
            .installs_after(4, 0);

        let reports = installer(&device).install_all(&ids(&[3, 4])).await.unwrap();

        let failed = report(&reports, 3);
        assert!(!failed.installed);
        assert_eq!(failed.errors.len(), 1);
        assert!(matches!(failed.errors[0], AttemptError::Control(_)));
        assert!(report(&reports, 4).installed);
    }

    #[tokio::test]
    async fn test_reconciliation_rescues_failed_poll() {
        let log = EventLog::default();
        // install, select, then the first poll (call 3) fails; the install still lands.
        let device = StubDevice::new(log.clone())
            .installs_after(5, 0)
            .fail_on_call(3);

        let reports = installer(&device).install_all(&ids(&[5])).await.unwrap();

        let rescued = report(&reports, 5);
        assert!(rescued.installed);
        assert!(rescued.errors.is_empty());
    }

    #[tokio::test]
    async fn test_final_listing_failure_means_reports_unavailable() {
        let log = EventLog::default();
        // install 9 rejected (1 call), then the final listing is call 2.
        let device = StubDevice::new(log.clone())
            .with_statuses("install 9", &[503])
            .fail_on_call(2);

        let result = installer(&device).install_all(&ids(&[9])).await;

        let err = result.unwrap_err();
        assert!(matches!(err, InstallError::ReportsUnavailable { .. }));
        assert!(err.is_reports_unavailable());
    }

    #[tokio::test]
    async fn test_final_listing_rejected_means_reports_unavailable() {
        let log = EventLog::default();
        let device = StubDevice::new(log.clone())
            .with_statuses("install 9", &[503])
            .with_statuses("query apps", &[503]);

        let result = installer(&device).install_all(&ids(&[9])).await;

        assert!(matches!(
            result,
            Err(InstallError::ListingRejected { status: 503 })
        ));
    }

    #[tokio::test]
    async fn test_cancel_during_poll_interval_interrupts_and_reconciles() {
        let log = EventLog::default();
        let device = StubDevice::new(log.clone()).with_installed(&[1]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let timings = InstallTimings {
            breather: Duration::ZERO,
            poll_interval: Duration::from_secs(60),
            max_polls: 15,
        };
        let started = std::time::Instant::now();
        let reports = AppInstaller::new(&device)
            .with_timings(timings)
            .with_cancellation(cancel)
            .install_all(&ids(&[5, 6]))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(
            log.events(),
            vec!["install 5", "key select", "query apps", "query apps"]
        );
        for app_id in [5, 6] {
            let interrupted = report(&reports, app_id);
            assert!(!interrupted.installed);
            assert!(matches!(interrupted.errors[..], [AttemptError::Interrupted]));
        }
    }

    #[tokio::test]
    async fn test_cancelled_batch_still_reconciles() {
        let log = EventLog::default();
        let device = StubDevice::new(log.clone()).with_installed(&[1]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let reports = installer(&device)
            .with_cancellation(cancel)
            .install_all(&ids(&[1, 2]))
            .await
            .unwrap();

        assert_eq!(log.events(), vec!["query apps"]);
        assert!(report(&reports, 1).installed);
        let skipped = report(&reports, 2);
        assert!(!skipped.installed);
        assert!(matches!(skipped.errors[..], [AttemptError::Interrupted]));
    }
}
