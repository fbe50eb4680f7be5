//! Core orchestration logic — types, parsing, graph building, resolution, ledger, execution.

pub mod config;
pub mod executor;
pub mod graph;
pub mod ledger;
pub mod module;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod types;
