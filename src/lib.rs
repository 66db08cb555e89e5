//! # Sample Operator - Level-Triggered Reconciliation Engine
//!
//! Drives `Sample` objects in a declarative store toward their desired
//! state:
//! - Lifecycle state machine with an exhaustive per-state dispatch
//! - Owner-scoped status writes that never clobber other writers' fields
//! - Finalizer guard gating physical deletion
//! - Single-flight work queue with token bucket + exponential backoff
//! - In-memory declarative store with field ownership and watch
//!
//! ## Architecture
//!
//! ```text
//!                  ┌──────────────────────────────────────────┐
//!   store watch →  │              Controller                  │
//!                  │  ┌──────────┐   ┌─────────────────────┐  │
//!                  │  │WorkQueue │ → │ Reconciler (xN)     │  │
//!                  │  │+RateLimit│   │ ┌────────┐┌───────┐ │  │
//!                  │  └──────────┘   │ │ Status ││Final- │ │  │
//!                  │        ↑        │ │Patchers││ izer  │ │  │
//!                  │        └─ Action└─┴────────┴┴───────┘─┘  │
//!                  └──────────────────────────────────────────┘
//!                                      │ apply (field owner)
//!                                      ↓
//!                               declarative Store
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod controller;
pub mod manifest;
pub mod resource;
pub mod store;
pub mod types;

// Internal utilities
pub mod observability;

pub use types::{Config, Error, Result};
