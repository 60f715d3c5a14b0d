// ============================================================================
// Linting
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![warn(dead_code)]
#![warn(unused_imports)]
#![warn(unused_variables)]
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![cfg_attr(not(test), warn(clippy::unwrap_used))]
#![cfg_attr(not(test), warn(clippy::expect_used))]
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # hcloud-reconcile
//!
//! A declarative, idempotent reconciliation engine for Hetzner Cloud
//! firewalls and private networks.
//!
//! ## Overview
//!
//! Describe resources in a YAML document and let the engine converge the
//! remote account to it:
//!
//! - Firewalls with ordered rule lists, replaced as a complete set
//! - Private networks, recreated when their IP range changes
//! - Import of existing objects into state
//! - Drift detection against the remote API
//!
//! ## Architecture
//!
//! 1. **Parser**: the document becomes typed, validated intents
//! 2. **Diff engine**: each intent is compared with last-known state
//! 3. **Executor**: operations run against the API with retry and backoff,
//!    and state is written after every successful call
//!
//! ## Modules
//!
//! - [`config`]: Document parsing and validation
//! - [`planner`]: Diff computation, plans and execution
//! - [`state`]: State storage backends (memory, local file)
//! - [`hcloud`]: Hetzner Cloud API client
//! - [`reconciler`]: Concurrent apply, import and drift checks
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! resources:
//!   - type: hcloud_firewall
//!     name: web
//!     attributes:
//!       name: basic-firewall
//!       rules:
//!         - direction: in
//!           protocol: tcp
//!           port: "80"
//!           source_ips: ["0.0.0.0/0", "::/0"]
//!           description: allow http in
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod hcloud;
pub mod planner;
pub mod reconciler;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{
    ConfigHasher, ConfigParser, ConfigValidator, ResourceAddress, ResourceIntent, ResourceKind,
    ValidatedConfig,
};
pub use error::{HcloudError, Result};
pub use hcloud::{CloudApi, HcloudClient, RemoteObject};
pub use planner::{DiffEngine, Operation, Plan, PlanExecutor, RetryPolicy};
pub use reconciler::{ApplyReport, DriftReport, Reconciler};
pub use state::{LocalStateStore, MemoryStateStore, ResourceState, StateStore};
