//! Orchestrator configuration.

use std::time::Duration;

/// Tunables for the asynchronous completion watcher.
///
/// The timeout bounds how long the UI waits on the push channel before
/// falling back to the reconciliation poll; the poll runs at a fixed
/// interval for a bounded number of attempts.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Wall-clock budget for a push-delivered completion signal.
    pub completion_timeout: Duration,

    /// Interval between authoritative status polls.
    pub poll_interval: Duration,

    /// Maximum number of reconciliation poll attempts per watch.
    pub max_poll_attempts: u32,
}

impl OrchestratorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let timeout_secs: u64 = std::env::var("CASEFLOW_COMPLETION_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(300);

        let poll_secs: u64 = std::env::var("CASEFLOW_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let max_poll_attempts: u32 = std::env::var("CASEFLOW_MAX_POLL_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(20);

        Self {
            completion_timeout: Duration::from_secs(timeout_secs),
            poll_interval: Duration::from_secs(poll_secs),
            max_poll_attempts,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            completion_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(30),
            max_poll_attempts: 20,
        }
    }
}
