//! # archi-core
//!
//! The Archi agent control plane: everything that decides what the agent
//! is doing at any moment, and with which model.
//!
//! - [`heartbeat`] -- three-tier adaptive activity scheduler
//! - [`router`] -- local/remote model routing with budget gating
//! - [`budget`] -- per-provider spend ledger and hard stops
//! - [`cache`] -- fingerprint-keyed response cache with single-flight
//! - [`goals`] -- persistent goal store with task DAGs
//! - [`executor`] -- multi-step plan executor with crash recovery
//! - [`dream`] -- idle-triggered background task execution
//! - [`agent_loop`] -- top-level tick coordinator
//! - [`safety`] -- risk-level authorization for structured actions
//! - [`tools`] -- tool trait and registry (implementations in archi-tools)
//! - [`monitor`] -- host health sampling
//! - [`parsing`] -- deterministic LLM-output parsing
//! - [`action_log`] -- append-only JSONL action log

pub mod action_log;
pub mod agent_loop;
pub mod budget;
pub mod cache;
pub mod dream;
pub mod executor;
pub mod findings;
pub mod goals;
pub mod heartbeat;
pub mod monitor;
pub mod parsing;
pub mod paths;
pub mod router;
pub mod safety;
pub mod tools;

pub use action_log::{ActionLogger, ActionRecord};
pub use agent_loop::{AgentDeps, AgentLoop, EmergencyStop};
pub use budget::{BudgetCheck, BudgetLedger, Period};
pub use cache::{CacheStats, ResponseCache, fingerprint};
pub use dream::{DreamCycle, DreamRecord};
pub use executor::{PlanExecutor, ProgressEvent, TaskOutcome};
pub use findings::{Finding, FindingsQueue};
pub use goals::GoalStore;
pub use heartbeat::{AdaptiveScheduler, SchedulerMode};
pub use monitor::{HealthStatus, SystemMonitor};
pub use router::{ModelRouter, RoutedCompletion};
pub use safety::{ApprovalHandler, DenyAll, SafetyController, TriggerAction};
pub use tools::{Tool, ToolError, ToolRegistry};
