//! Safety controller: risk-level authorization for trigger actions.
//!
//! Every structured action the agent loop dispatches passes through
//! [`SafetyController::authorize`]: path parameters of write actions must
//! resolve inside the project root, the action's risk level must be known,
//! its confidence must clear the level's threshold, and the level's
//! requirement decides whether the action runs autonomously, needs human
//! approval, or is queued for manual execution.
//!
//! Read-only actions are exempt from the path check; they may inspect the
//! full filesystem.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde_json::Value;
use tracing::{error, info, warn};

use archi_types::config::RiskLevel;

use crate::paths::resolve_within;

/// Actions that never modify state and skip workspace isolation.
const READ_ONLY_ACTIONS: &[&str] = &["read_file", "list_files", "search_files", "get_file_info"];

/// Parameter keys known to carry file paths.
const PATH_PARAM_KEYS: &[&str] = &[
    "path",
    "file_path",
    "dest",
    "destination",
    "source",
    "target",
    "output_path",
    "input_path",
];

/// What a risk level demands before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Autonomous,
    NotifyAndLog,
    HumanApproval,
    ManualExecuteOnly,
}

impl Requirement {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "autonomous" => Some(Self::Autonomous),
            "notify_and_log" => Some(Self::NotifyAndLog),
            "human_approval" => Some(Self::HumanApproval),
            "manual_execute_only" => Some(Self::ManualExecuteOnly),
            _ => None,
        }
    }
}

/// A structured action awaiting authorization.
#[derive(Debug, Clone)]
pub struct TriggerAction {
    pub action_type: String,
    pub parameters: Value,
    pub confidence: f32,
    pub reasoning: Option<String>,
    /// Filled in by the controller from the matching risk level.
    pub risk_level: Option<String>,
}

impl TriggerAction {
    pub fn new(action_type: impl Into<String>, parameters: Value, confidence: f32) -> Self {
        Self {
            action_type: action_type.into(),
            parameters,
            confidence,
            reasoning: None,
            risk_level: None,
        }
    }
}

/// Answers approval prompts for `human_approval` actions.
///
/// The CLI installs a stdin prompt; tests and headless runs use
/// [`DenyAll`].
pub trait ApprovalHandler: Send + Sync {
    fn request_approval(&self, action: &TriggerAction) -> bool;
}

/// Refuses every approval request.
pub struct DenyAll;

impl ApprovalHandler for DenyAll {
    fn request_approval(&self, action: &TriggerAction) -> bool {
        info!(action = %action.action_type, "approval denied (no handler)");
        false
    }
}

/// Risk-level gatekeeper for structured actions.
pub struct SafetyController {
    risk_levels: HashMap<String, RiskLevel>,
    project_root: PathBuf,
    approval: Box<dyn ApprovalHandler>,
    manual_queue: Mutex<Vec<TriggerAction>>,
}

impl SafetyController {
    pub fn new(
        risk_levels: HashMap<String, RiskLevel>,
        project_root: PathBuf,
        approval: Box<dyn ApprovalHandler>,
    ) -> Self {
        Self {
            risk_levels,
            project_root,
            approval,
            manual_queue: Mutex::new(Vec::new()),
        }
    }

    /// Authorize an action. Mutates `action.risk_level` on a level match.
    pub fn authorize(&self, action: &mut TriggerAction) -> bool {
        if self.violates_path_isolation(action) {
            error!(action = %action.action_type, "action blocked: path outside project root");
            return false;
        }

        let Some((level_name, level)) = self.risk_level_for(&action.action_type) else {
            warn!(action = %action.action_type, "unknown action type, denying by default");
            return false;
        };

        if action.confidence < level.threshold {
            warn!(
                action = %action.action_type,
                confidence = action.confidence,
                threshold = level.threshold,
                "confidence too low"
            );
            return false;
        }

        action.risk_level = Some(level_name.to_string());
        let Some(requirement) = Requirement::parse(&level.requirement) else {
            warn!(
                action = %action.action_type,
                requirement = %level.requirement,
                "unknown requirement, denying"
            );
            return false;
        };

        match requirement {
            Requirement::Autonomous => true,
            Requirement::NotifyAndLog => {
                info!(action = %action.action_type, "notify and log");
                true
            }
            Requirement::HumanApproval => self.approval.request_approval(action),
            Requirement::ManualExecuteOnly => {
                info!(action = %action.action_type, "queued for manual execution");
                self.manual_queue
                    .lock()
                    .expect("safety controller lock poisoned")
                    .push(action.clone());
                false
            }
        }
    }

    /// True when a write action carries a path parameter that resolves
    /// outside the project root.
    fn violates_path_isolation(&self, action: &TriggerAction) -> bool {
        if READ_ONLY_ACTIONS.contains(&action.action_type.as_str()) {
            return false;
        }
        let Some(params) = action.parameters.as_object() else {
            return false;
        };
        for key in PATH_PARAM_KEYS {
            if let Some(Value::String(path)) = params.get(*key)
                && resolve_within(&self.project_root, path).is_err()
            {
                return true;
            }
        }
        false
    }

    fn risk_level_for(&self, action_type: &str) -> Option<(&str, &RiskLevel)> {
        self.risk_levels
            .iter()
            .find(|(_, level)| level.actions.iter().any(|a| a == action_type))
            .map(|(name, level)| (name.as_str(), level))
    }

    /// Drain the manual-execution queue.
    pub fn take_manual_queue(&self) -> Vec<TriggerAction> {
        std::mem::take(
            &mut *self
                .manual_queue
                .lock()
                .expect("safety controller lock poisoned"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ApproveAll;

    impl ApprovalHandler for ApproveAll {
        fn request_approval(&self, _action: &TriggerAction) -> bool {
            true
        }
    }

    struct RecordingHandler {
        asked: AtomicBool,
        answer: bool,
    }

    impl ApprovalHandler for RecordingHandler {
        fn request_approval(&self, _action: &TriggerAction) -> bool {
            self.asked.store(true, Ordering::SeqCst);
            self.answer
        }
    }

    fn levels() -> HashMap<String, RiskLevel> {
        let mut levels = HashMap::new();
        levels.insert(
            "low".into(),
            RiskLevel {
                actions: vec!["read_file".into(), "heartbeat".into()],
                threshold: 0.3,
                requirement: "autonomous".into(),
            },
        );
        levels.insert(
            "medium".into(),
            RiskLevel {
                actions: vec!["create_file".into()],
                threshold: 0.6,
                requirement: "notify_and_log".into(),
            },
        );
        levels.insert(
            "high".into(),
            RiskLevel {
                actions: vec!["write_source".into()],
                threshold: 0.8,
                requirement: "human_approval".into(),
            },
        );
        levels.insert(
            "critical".into(),
            RiskLevel {
                actions: vec!["send_email".into()],
                threshold: 0.9,
                requirement: "manual_execute_only".into(),
            },
        );
        levels
    }

    fn controller(approval: Box<dyn ApprovalHandler>) -> SafetyController {
        SafetyController::new(levels(), PathBuf::from("/srv/archi"), approval)
    }

    #[test]
    fn autonomous_action_above_threshold_passes() {
        let controller = controller(Box::new(DenyAll));
        let mut action = TriggerAction::new("heartbeat", json!({}), 1.0);
        assert!(controller.authorize(&mut action));
        assert_eq!(action.risk_level.as_deref(), Some("low"));
    }

    #[test]
    fn low_confidence_is_denied() {
        let controller = controller(Box::new(ApproveAll));
        let mut action = TriggerAction::new("write_source", json!({}), 0.5);
        assert!(!controller.authorize(&mut action));
    }

    #[test]
    fn unknown_action_denied_by_default() {
        let controller = controller(Box::new(ApproveAll));
        let mut action = TriggerAction::new("launch_rocket", json!({}), 1.0);
        assert!(!controller.authorize(&mut action));
    }

    #[test]
    fn write_outside_project_root_blocked() {
        let controller = controller(Box::new(ApproveAll));
        let mut action = TriggerAction::new(
            "create_file",
            json!({"path": "/etc/passwd", "content": "x"}),
            1.0,
        );
        assert!(!controller.authorize(&mut action));
    }

    #[test]
    fn write_inside_project_root_allowed() {
        let controller = controller(Box::new(ApproveAll));
        let mut action = TriggerAction::new(
            "create_file",
            json!({"path": "workspace/notes.md", "content": "x"}),
            1.0,
        );
        assert!(controller.authorize(&mut action));
    }

    #[test]
    fn read_only_actions_skip_path_isolation() {
        let controller = controller(Box::new(ApproveAll));
        let mut action = TriggerAction::new("read_file", json!({"path": "/etc/hostname"}), 1.0);
        assert!(controller.authorize(&mut action));
    }

    #[test]
    fn human_approval_consults_handler() {
        let handler = Box::new(RecordingHandler {
            asked: AtomicBool::new(false),
            answer: true,
        });
        let controller = SafetyController::new(levels(), PathBuf::from("/srv/archi"), handler);
        let mut action = TriggerAction::new("write_source", json!({"path": "src/x.rs"}), 0.95);
        assert!(controller.authorize(&mut action));
    }

    #[test]
    fn human_approval_denial_blocks() {
        let controller = controller(Box::new(DenyAll));
        let mut action = TriggerAction::new("write_source", json!({"path": "src/x.rs"}), 0.95);
        assert!(!controller.authorize(&mut action));
    }

    #[test]
    fn manual_execute_only_queues_and_denies() {
        let controller = controller(Box::new(ApproveAll));
        let mut action = TriggerAction::new("send_email", json!({"to": "a@b.c"}), 0.95);
        assert!(!controller.authorize(&mut action));

        let queue = controller.take_manual_queue();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].action_type, "send_email");
        assert!(controller.take_manual_queue().is_empty());
    }
}
