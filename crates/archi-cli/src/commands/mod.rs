//! Subcommand implementations.

pub mod goal_cmd;
pub mod run;
pub mod status;
pub mod usage_cmd;
