//! CADENCE: synthetic execution backend with an on-chain treasury.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod strategy;
pub mod engine;
pub mod ledger;
pub mod withdrawal;
pub mod dashboard;
