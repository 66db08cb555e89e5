//! Core types for the operator.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (ObjectKey, FieldManager, Uid)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for the rate limiter, reconciler and workers

mod config;
mod errors;
mod ids;

pub use config::{
    Config, ControllerConfig, FinalizerReleasePolicy, ObservabilityConfig, RateLimiterConfig,
    ReconcilerConfig, StateOwnership,
};
pub use errors::{Error, Result};
pub use ids::{FieldManager, ObjectKey, Uid};
