//! Configuration structures.
//!
//! Configuration is loaded from a YAML file and command-line flags, validated
//! once at startup, and then shared read-only.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::errors::{Error, Result};
use crate::resource::State;

/// Global operator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Work queue rate limiting.
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,

    /// State machine behaviour.
    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    /// Worker pool.
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Parse a YAML document. Missing sections fall back to defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&raw)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limiter;
        if rl.burst == 0 {
            return Err(Error::validation("rate_limiter.burst must be > 0"));
        }
        if rl.frequency == 0 {
            return Err(Error::validation("rate_limiter.frequency must be > 0"));
        }
        if rl.base_delay.is_zero() {
            return Err(Error::validation("rate_limiter.base_delay must be > 0"));
        }
        if rl.base_delay > rl.failure_max_delay {
            return Err(Error::validation(format!(
                "rate_limiter.base_delay ({:?}) exceeds failure_max_delay ({:?})",
                rl.base_delay, rl.failure_max_delay
            )));
        }

        let rc = &self.reconciler;
        if rc.finalizer.is_empty() {
            return Err(Error::validation("reconciler.finalizer must not be empty"));
        }
        if rc.field_owner.is_empty() || rc.condition_owner.is_empty() {
            return Err(Error::validation("reconciler field owners must not be empty"));
        }
        if rc.field_owner == rc.condition_owner {
            return Err(Error::validation(
                "reconciler.field_owner and reconciler.condition_owner must differ",
            ));
        }
        if rc.final_state == State::Unset || rc.final_deletion_state == State::Unset {
            return Err(Error::validation(
                "final_state and final_deletion_state must name a concrete state",
            ));
        }
        if rc.final_state.is_terminal() {
            return Err(Error::validation(format!(
                "reconciler.final_state cannot be the terminal state {}",
                rc.final_state
            )));
        }
        if rc.final_state == rc.final_deletion_state {
            return Err(Error::validation(
                "reconciler.final_state and reconciler.final_deletion_state must differ",
            ));
        }
        if rc.requeue_interval.is_zero() {
            return Err(Error::validation("reconciler.requeue_interval must be > 0"));
        }
        if rc.store_timeout.is_zero() {
            return Err(Error::validation("reconciler.store_timeout must be > 0"));
        }

        if self.controller.workers == 0 {
            return Err(Error::validation("controller.workers must be > 0"));
        }
        Ok(())
    }
}

/// Rate limiter parameters: global token bucket + per-key exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Bucket capacity.
    pub burst: u32,

    /// Bucket refill rate in tokens per second.
    pub frequency: u32,

    /// First per-key failure delay.
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Cap on the per-key failure delay.
    #[serde(with = "humantime_serde")]
    pub failure_max_delay: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            burst: 200,
            frequency: 30,
            base_delay: Duration::from_secs(1),
            failure_max_delay: Duration::from_secs(1000),
        }
    }
}

/// Who writes `status.state` besides the deletion transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum StateOwnership {
    /// Another writer drives the lifecycle; only conditions are written here.
    #[default]
    External,
    /// This reconciler also advances Unset → Processing → final state.
    Managed,
}

/// Who removes the finalizer once deletion cleanup is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum FinalizerReleasePolicy {
    /// Leave the marker for an external cleanup workflow.
    #[default]
    External,
    /// Drop the marker once the object sits in the final deletion state.
    OnFinalDeletionState,
}

/// Reconciler configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// State the lifecycle writer settles on after processing.
    pub final_state: State,

    /// State written once a deletion timestamp appears.
    pub final_deletion_state: State,

    /// Slow-poll interval for steady states.
    #[serde(with = "humantime_serde")]
    pub requeue_interval: Duration,

    /// Finalizer marker guarding deletion.
    pub finalizer: String,

    /// Field owner for `status.state` and the finalizer set.
    pub field_owner: String,

    /// Field owner for `status.conditions`.
    pub condition_owner: String,

    pub state_ownership: StateOwnership,

    pub finalizer_release: FinalizerReleasePolicy,

    /// Upper bound of the random pause before dispatch. Zero disables it.
    #[serde(with = "humantime_serde")]
    pub dispatch_jitter: Duration,

    /// Deadline applied to each store call.
    #[serde(with = "humantime_serde")]
    pub store_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            final_state: State::Ready,
            final_deletion_state: State::Deleting,
            requeue_interval: Duration::from_secs(3),
            finalizer: "sample.kyma-project.io/finalizer".to_string(),
            field_owner: "sample.kyma-project.io/owner".to_string(),
            condition_owner: "sample.kyma-project.io/secondowner".to_string(),
            state_ownership: StateOwnership::External,
            finalizer_release: FinalizerReleasePolicy::External,
            dispatch_jitter: Duration::from_millis(100),
            store_timeout: Duration::from_secs(10),
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    /// Number of concurrent reconcile workers.
    pub workers: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
