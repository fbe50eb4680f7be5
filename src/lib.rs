//! Rivet — declarative contract deployment orchestrator.
//!
//! Declarations become a resolved action DAG. Every submission is recorded in
//! a durable ledger, so re-running a deployment resumes where it stopped
//! instead of paying for completed operations twice.

pub mod audit;
pub mod cli;
pub mod core;
pub mod error;
pub mod target;

pub use error::{Error, Result};
