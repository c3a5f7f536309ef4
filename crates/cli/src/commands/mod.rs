//! Subcommand implementations

pub mod cache;
pub mod health;
pub mod scan;
