//! Runtime configuration. Every tunable has a compiled-in default that can be
//! overridden through an environment variable.

use std::env;
use std::str::FromStr;
use std::time::Duration;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|val| val.trim().parse::<T>().ok())
        .unwrap_or(default) // Default value if env var is not set or invalid
}

/// How long SSDP discovery listens for responses.
pub fn discovery_timeout() -> Duration {
    Duration::from_secs(env_or("DISCOVERY_TIMEOUT_SECS", 10))
}

/// Connection settings shared by every control client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcpConfig {
    pub port: u16,
    pub timeout: Duration,
}

impl EcpConfig {
    pub const DEFAULT_PORT: u16 = 8060;

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_or("ECP_PORT", defaults.port),
            timeout: Duration::from_secs(env_or("ECP_TIMEOUT_SECS", defaults.timeout.as_secs())),
        }
    }
}

impl Default for EcpConfig {
    fn default() -> Self {
        Self {
            port: Self::DEFAULT_PORT,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Waits used by the exercise script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptTimings {
    /// After launching an app, before the first keypress.
    pub launch_settle: Duration,
    /// How long each piece of content is left playing.
    pub playback: Duration,
    /// After HOME during a relaunch, before launching again.
    pub home_settle: Duration,
    /// Between directional keypresses.
    pub nav_step: Duration,
    /// After the final HOME.
    pub final_settle: Duration,
}

impl ScriptTimings {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            launch_settle: Duration::from_secs(env_or(
                "EXERCISE_LAUNCH_SETTLE_SECS",
                d.launch_settle.as_secs(),
            )),
            playback: Duration::from_secs(env_or("EXERCISE_PLAYBACK_SECS", d.playback.as_secs())),
            home_settle: Duration::from_secs(env_or(
                "EXERCISE_HOME_SETTLE_SECS",
                d.home_settle.as_secs(),
            )),
            nav_step: Duration::from_millis(env_or(
                "EXERCISE_NAV_STEP_MILLIS",
                d.nav_step.as_millis() as u64,
            )),
            final_settle: Duration::from_secs(env_or(
                "EXERCISE_FINAL_SETTLE_SECS",
                d.final_settle.as_secs(),
            )),
        }
    }

    /// All waits zeroed. Used by tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            launch_settle: Duration::ZERO,
            playback: Duration::ZERO,
            home_settle: Duration::ZERO,
            nav_step: Duration::ZERO,
            final_settle: Duration::ZERO,
        }
    }
}

impl Default for ScriptTimings {
    fn default() -> Self {
        Self {
            launch_settle: Duration::from_secs(20),
            playback: Duration::from_secs(5 * 60),
            home_settle: Duration::from_secs(10),
            nav_step: Duration::from_secs(1),
            final_settle: Duration::from_secs(10),
        }
    }
}

/// Waits and budgets used while installing apps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallTimings {
    /// Pause after each install request; back to back requests can make the device stop responding.
    pub breather: Duration,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl InstallTimings {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            breather: Duration::from_millis(env_or(
                "INSTALL_BREATHER_MILLIS",
                d.breather.as_millis() as u64,
            )),
            poll_interval: Duration::from_secs(env_or(
                "INSTALL_POLL_INTERVAL_SECS",
                d.poll_interval.as_secs(),
            )),
            max_polls: env_or("INSTALL_MAX_POLLS", d.max_polls),
        }
    }

    pub fn immediate() -> Self {
        Self {
            breather: Duration::ZERO,
            poll_interval: Duration::ZERO,
            ..Self::default()
        }
    }
}

impl Default for InstallTimings {
    fn default() -> Self {
        Self {
            breather: Duration::from_secs(1),
            poll_interval: Duration::from_secs(5),
            max_polls: 15,
        }
    }
}

/// Live capture parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Max bytes kept per frame.
    pub snaplen: i32,
    /// Max time the OS buffers frames before handing them over; also the stop-flag poll period.
    pub read_timeout_ms: i32,
    pub promiscuous: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            snaplen: 65_536,
            read_timeout_ms: 50,
            promiscuous: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_timing_defaults() {
        let t = ScriptTimings::default();
        assert_eq!(t.launch_settle, Duration::from_secs(20));
        assert_eq!(t.playback, Duration::from_secs(300));
        assert_eq!(t.home_settle, Duration::from_secs(10));
        assert_eq!(t.nav_step, Duration::from_secs(1));
    }

    #[test]
    fn test_install_timing_budget() {
        let t = InstallTimings::default();
        assert_eq!(t.poll_interval * t.max_polls, Duration::from_secs(75));
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        // Unique key so parallel tests never race on it.
        unsafe { env::set_var("SMARTTV_TEST_GARBAGE_VALUE", "not-a-number") };
        assert_eq!(env_or("SMARTTV_TEST_GARBAGE_VALUE", 42u32), 42);
        assert_eq!(env_or("SMARTTV_TEST_UNSET_VALUE", 7u32), 7);
    }
}
