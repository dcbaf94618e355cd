//! Shared library for HobbyFarm VM provisioners
//!
//! A provisioner is a Kubernetes controller that turns VirtualMachine objects
//! into real machines on some infrastructure. This crate holds what every
//! provisioner needs regardless of where the machines run.
//!
//! # Modules
//!
//! - [`retry`] - Retry ledgers persisted in object annotations
//! - [`clock`] - Injectable time source for retry policy checks
//! - [`crd`] - VirtualMachine and Environment resource types
//! - [`config`] - Template and environment config item lookup
//! - [`ssh`] - Per-VM SSH key secrets
//! - [`instance_id`] - Stable installation id stored in a ConfigMap
//! - [`provider`] - Provider trait and controller helpers
//! - [`controller`] - Runs a provider: CRD install, then controllers
//! - [`labels`] - Label keys and selectors
//! - [`namespace`] - Operating namespace resolution
//! - [`parse`] - Lenient string parsing helpers
//! - [`telemetry`] - Tracing subscriber setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod clock;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod instance_id;
pub mod labels;
pub mod namespace;
pub mod parse;
pub mod provider;
pub mod retry;
pub mod ssh;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::Error;
pub use retry::{AttemptResult, LedgerEntry, RetryLedger, Taggable};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
