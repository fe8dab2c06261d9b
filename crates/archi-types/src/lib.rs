//! # archi-types
//!
//! Shared types for the Archi autonomous agent: configuration schema,
//! error taxonomy, the goal/task model, and completion result types.
//!
//! This crate has no async code and no I/O beyond config file loading,
//! so every other crate in the workspace can depend on it freely.

pub mod config;
pub mod error;
pub mod goal;
pub mod provider;

pub use config::Config;
pub use error::{ArchiError, Result};
pub use goal::{Goal, Task, TaskStatus};
pub use provider::{Completion, Prompt, RouteFlags};
