use crate::process::types::ExitInfo;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Auto-restart configuration attached to a process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    /// Whether automatic restart is enabled
    pub enabled: bool,
    /// Consecutive crash-restart cycles allowed before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before relaunching (in milliseconds)
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// A run lasting at least this long resets the retry streak (in milliseconds)
    #[serde(default = "default_reset_after_ms")]
    pub reset_after_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    1000
}

fn default_reset_after_ms() -> u64 {
    30_000
}

impl RestartPolicy {
    /// An enabled policy with default limits
    pub fn new() -> Self {
        Self {
            enabled: true,
            max_retries: default_max_retries(),
            delay_ms: default_delay_ms(),
            reset_after_ms: default_reset_after_ms(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn with_reset_after_ms(mut self, reset_after_ms: u64) -> Self {
        self.reset_after_ms = reset_after_ms;
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn reset_after(&self) -> Duration {
        Duration::from_millis(self.reset_after_ms)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a process exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Manual stop or exit code 0: nothing to report
    Clean,
    /// Abnormal exit with no usable policy; reported, not restarted
    Crashed,
    /// Retry budget used up; reported, not restarted
    Exhausted { retry_count: u32, max_retries: u32 },
    /// Relaunch after `delay` carrying the new retry count
    Restart {
        retry_count: u32,
        max_retries: u32,
        delay: Duration,
    },
}

impl RestartDecision {
    /// Whether this outcome produces a crash notification
    pub fn is_crash(&self) -> bool {
        !matches!(self, RestartDecision::Clean)
    }

    pub fn will_restart(&self) -> bool {
        matches!(self, RestartDecision::Restart { .. })
    }
}

/// Decide what happens after a supervised process exits.
///
/// `retry_count` is the streak carried by the run that just ended and
/// `elapsed` how long that run lasted. A run that outlived the policy's reset
/// window starts a fresh streak.
pub fn evaluate(
    exit: &ExitInfo,
    manual_stop: bool,
    policy: Option<&RestartPolicy>,
    retry_count: u32,
    elapsed: Duration,
) -> RestartDecision {
    let clean_exit = exit.is_success();

    let policy = match policy {
        Some(policy) if policy.enabled && !manual_stop && !clean_exit => policy,
        _ => {
            if manual_stop || clean_exit {
                return RestartDecision::Clean;
            }
            return RestartDecision::Crashed;
        }
    };

    let effective_retry_count = if elapsed >= policy.reset_after() {
        0
    } else {
        retry_count
    };

    if effective_retry_count >= policy.max_retries {
        return RestartDecision::Exhausted {
            retry_count: effective_retry_count,
            max_retries: policy.max_retries,
        };
    }

    RestartDecision::Restart {
        retry_count: effective_retry_count + 1,
        max_retries: policy.max_retries,
        delay: policy.delay(),
    }
}
