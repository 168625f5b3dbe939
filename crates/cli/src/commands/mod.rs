//! Subcommand implementations

pub mod history;
pub mod models;
pub mod qtable;
