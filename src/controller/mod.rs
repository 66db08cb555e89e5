//! Reconciliation engine.
//!
//! - [`rate_limiter`]: token bucket + per-key exponential backoff
//! - [`queue`]: single-flight work queue
//! - [`status`]: owner-scoped status writers
//! - [`finalizer`]: deletion guard
//! - [`reconciler`]: the state machine
//! - [`runner`]: workers, watch pump, shutdown

pub mod events;
pub mod finalizer;
pub mod queue;
pub mod rate_limiter;
pub mod reconciler;
pub mod recovery;
pub mod runner;
pub mod status;

pub use events::{ChannelRecorder, Event, EventRecorder, EventType, TracingRecorder};
pub use finalizer::{
    ExternalRelease, FinalizerGuard, FinalizerOutcome, FinalizerRelease, ReleaseOnFinalState,
};
pub use queue::WorkQueue;
pub use rate_limiter::{
    default_rate_limiter, BucketRateLimiter, ItemExponentialFailureRateLimiter, MaxOfRateLimiter,
    RateLimiter,
};
pub use reconciler::{divisible_by_three, Action, Reconciler};
pub use runner::{Controller, ControllerStats, StatsSnapshot};
pub use status::StatusPatcher;
