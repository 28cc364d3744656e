//! Timing and limit configuration.
//!
//! Defaults match the cadence the control room runs at; the environment
//! overrides exist for bench setups where the simulated hardware settles
//! faster or slower than the real machine.

use std::time::Duration;

/// Interval between condition checks in blocking waits (abort is observed at
/// this cadence).
const DEFAULT_POLL_TICK_MS: u64 = 500;

/// Bound on waiting for interlock latches to clear after a reset command.
const DEFAULT_INTERLOCK_RESET_TIMEOUT_SECS: u64 = 3;

/// Delay between consecutive cavities when a cryomodule run fans out, to
/// avoid hammering the control system.
const DEFAULT_INTER_CAVITY_DELAY_MS: u64 = 200;

/// Timing configuration for cavity setup and shutdown runs.
#[derive(Debug, Clone)]
pub struct SetupConfig {
    /// Tick of every sleep-poll wait. Configure via `SRF_POLL_TICK_MS`.
    pub poll_tick: Duration,

    /// How long an interlock reset may take before the run fails.
    pub interlock_reset_timeout: Duration,

    /// Pause between sibling cavities in a hierarchy run.
    pub inter_cavity_delay: Duration,
}

impl SetupConfig {
    pub fn new() -> Self {
        SetupConfig {
            poll_tick: Duration::from_millis(DEFAULT_POLL_TICK_MS),
            interlock_reset_timeout: Duration::from_secs(DEFAULT_INTERLOCK_RESET_TIMEOUT_SECS),
            inter_cavity_delay: Duration::from_millis(DEFAULT_INTER_CAVITY_DELAY_MS),
        }
    }

    /// Creates a `SetupConfig` from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let poll_ms = env_u64("SRF_POLL_TICK_MS").unwrap_or(DEFAULT_POLL_TICK_MS);
        SetupConfig {
            poll_tick: Duration::from_millis(poll_ms),
            ..Self::new()
        }
    }
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Period of the quench monitor's scan over all cavities.
const DEFAULT_SCAN_INTERVAL_MS: u64 = 1_000;

/// Cooldown after acting on a cavity's quench, preventing reset storms and
/// re-validation of a waveform that may still be mutating.
const DEFAULT_RESET_COOLDOWN_SECS: u64 = 3;

/// Wait before reading fault waveforms, which may still be filling right
/// after a trip.
const DEFAULT_WAVEFORM_SETTLE_MS: u64 = 100;

/// Consecutive heartbeat failures tolerated before the monitor stops.
const DEFAULT_MAX_HEARTBEAT_FAILURES: u32 = 10;

/// Configuration for the quench reset monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Scan period. Configure via `SRF_QUENCH_SCAN_INTERVAL_MS`.
    pub scan_interval: Duration,

    /// Per-cavity cooldown between actions.
    pub reset_cooldown: Duration,

    /// Settle time before reading fault waveforms.
    pub waveform_settle: Duration,

    /// Consecutive heartbeat failures treated as fatal.
    pub max_heartbeat_failures: u32,
}

impl MonitorConfig {
    pub fn new() -> Self {
        MonitorConfig {
            scan_interval: Duration::from_millis(DEFAULT_SCAN_INTERVAL_MS),
            reset_cooldown: Duration::from_secs(DEFAULT_RESET_COOLDOWN_SECS),
            waveform_settle: Duration::from_millis(DEFAULT_WAVEFORM_SETTLE_MS),
            max_heartbeat_failures: DEFAULT_MAX_HEARTBEAT_FAILURES,
        }
    }

    /// Creates a `MonitorConfig` from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let scan_ms = env_u64("SRF_QUENCH_SCAN_INTERVAL_MS").unwrap_or(DEFAULT_SCAN_INTERVAL_MS);
        MonitorConfig {
            scan_interval: Duration::from_millis(scan_ms),
            ..Self::new()
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_defaults_have_expected_values() {
        let config = SetupConfig::new();
        assert_eq!(config.poll_tick, Duration::from_millis(500));
        assert_eq!(config.interlock_reset_timeout, Duration::from_secs(3));
        assert_eq!(config.inter_cavity_delay, Duration::from_millis(200));
    }

    #[test]
    fn monitor_defaults_have_expected_values() {
        let config = MonitorConfig::new();
        assert_eq!(config.scan_interval, Duration::from_secs(1));
        assert_eq!(config.reset_cooldown, Duration::from_secs(3));
        assert_eq!(config.waveform_settle, Duration::from_millis(100));
        assert_eq!(config.max_heartbeat_failures, 10);
    }
}
