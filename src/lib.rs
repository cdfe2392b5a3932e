//! requery_sim: simulation of human-in-the-loop deferral policies.
//!
//! A pool of items (tracked videos or referring-expression targets) each
//! holds a belief and a confidence score. The deferral loop repeatedly
//! re-queries the least confident item, folds the new evidence in with one of
//! five replacement policies, and records mean error against the re-query
//! rate for every depth constraint.

pub mod baseline;
pub mod belief;
pub mod core;
pub mod deferral;
pub mod geometry;
pub mod logger;
pub mod metrics;
pub mod policy;
pub mod runner;
pub mod scoring;
pub mod store;
pub mod task;

#[cfg(feature = "cli")]
pub mod cli_app;

#[cfg(test)]
mod deferral_invariant_tests;
