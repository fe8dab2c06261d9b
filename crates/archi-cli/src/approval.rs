//! Stdin approval prompt for `human_approval` actions.

use std::io::Write;

use archi_core::safety::{ApprovalHandler, TriggerAction};
use tracing::info;

/// Asks the operator on stdin. Anything but `yes` denies; EOF denies.
pub struct StdinApproval;

impl ApprovalHandler for StdinApproval {
    fn request_approval(&self, action: &TriggerAction) -> bool {
        let divider = "=".repeat(60);
        println!("\n{divider}");
        println!("APPROVAL REQUIRED");
        println!("{divider}");
        println!("Action:     {}", action.action_type);
        println!("Parameters: {}", action.parameters);
        println!(
            "Risk level: {}",
            action.risk_level.as_deref().unwrap_or("unknown")
        );
        println!("Confidence: {:.0}%", action.confidence * 100.0);
        println!(
            "Reasoning:  {}",
            action.reasoning.as_deref().unwrap_or("-")
        );
        println!("{divider}");
        print!("Approve? (yes/no): ");
        let _ = std::io::stdout().flush();

        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            info!(action = %action.action_type, "approval read failed, denying");
            return false;
        }
        let approved = answer.trim().eq_ignore_ascii_case("yes");
        info!(
            action = %action.action_type,
            approved,
            "operator approval decision"
        );
        approved
    }
}
