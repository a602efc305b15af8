//! aeromigrate - deterministic revision-graph schema migrations
//!
//! Revisions form a directed acyclic graph through parent and dependency
//! edges. The engine loads and validates the graph, plans the ordered steps
//! between the applied state and a target, and executes them one transaction
//! per step, recording the applied state in the target database.

pub mod cli;
pub mod config;
pub mod config_validator;
pub mod logging;
pub mod migrations;
