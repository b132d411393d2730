//! # smoke-harness
//!
//! Smoke-test harness for the validator network: orchestrates a simulated
//! multi-node ledger network, drives a bounded load workload against it,
//! and verifies that every node converges on the same state within a
//! bounded polling budget.
//!
//! The harness does not implement consensus, transaction processing or
//! ledger storage; those belong to the network under test, reached through
//! a narrow HTTP surface (readiness probe, operation submission, state
//! reads).
//!
//! Scenarios are disabled by default because they are slow and
//! infrastructure-heavy; set `SMOKE_ENABLE=1` and run the ignored tests in
//! [`scenarios`] to execute them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod archive;
pub mod client;
pub mod config;
pub mod convergence;
pub mod load;
pub mod network;
pub mod scenario;

pub mod scenarios;

pub use config::{HarnessConfig, NetworkSource};
pub use scenario::{ScenarioOutcome, ScenarioReport, SmokeScenario};
