//! `archi run` -- the agent loop.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use archi_core::agent_loop::{AgentDeps, AgentLoop};
use archi_types::{Prompt, RouteFlags};

use crate::wiring::Services;

pub async fn execute(project_root: &Path) -> anyhow::Result<()> {
    let services = Services::build(project_root);
    info!(root = %project_root.display(), "starting Archi");

    // One test query verifies routing in agent context. prefer_local keeps
    // it free; no chain-of-thought for trivial arithmetic.
    let test = services
        .router
        .generate(
            &Prompt::from_user("What is 2+2? Answer with just the number."),
            50,
            0.7,
            RouteFlags {
                prefer_local: true,
                use_reasoning: false,
                ..Default::default()
            },
        )
        .await;
    if test.success {
        info!(model = %test.model, answer = %test.text.trim(), "router self-test passed");
    } else {
        info!(
            error = %test.error.as_deref().unwrap_or("unknown"),
            "router self-test failed; continuing in degraded mode"
        );
    }

    // Dream cycles pull from the goal store and run the plan executor with
    // the free local model as planner.
    services.dream.enable_autonomous_mode(
        services.goal_store.clone(),
        services.planner.clone(),
        services.executor.clone(),
        services.tools.clone(),
    );
    services.dream.attach_findings(services.findings.clone());

    let agent = Arc::new(AgentLoop::new(
        project_root,
        AgentDeps {
            monitor: services.monitor.clone(),
            scheduler: services.scheduler.clone(),
            safety: services.safety.clone(),
            tools: services.tools.clone(),
            action_log: services.action_log.clone(),
            goal_store: services.goal_store.clone(),
            ledger: services.ledger.clone(),
            dream: services.dream.clone(),
        },
    ));

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, requesting graceful shutdown");
            signal_token.cancel();
        }
    });

    agent.run(shutdown).await;
    info!("Archi stopped");
    Ok(())
}
