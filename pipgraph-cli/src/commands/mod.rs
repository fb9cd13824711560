//! Command implementations for the pipgraph CLI
//!
//! Each command module provides a `run` function that executes the command logic.

pub mod build;
pub mod query;
