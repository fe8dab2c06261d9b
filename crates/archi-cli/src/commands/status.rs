//! `archi status` -- goals, budget, cache, and dream-cycle overview.

use std::path::Path;

use archi_core::budget::Period;

use crate::wiring::Services;

pub async fn execute(project_root: &Path) -> anyhow::Result<()> {
    let services = Services::build(project_root);

    println!("Archi");
    println!("  data dir:    {}", services.data_dir.display());
    println!(
        "  ports:       dashboard {}, web chat {}",
        services.config.ports.dashboard, services.config.ports.web_chat
    );

    let goals = services.goal_store.status();
    println!("Goals");
    println!("  total:       {}", goals.total_goals);
    println!("  active:      {}", goals.active_goals);
    println!(
        "  tasks:       {} ({} pending, {} in progress, {} completed)",
        goals.total_tasks, goals.pending_tasks, goals.in_progress_tasks, goals.completed_tasks
    );

    let today = services.ledger.summary(Period::Today);
    let month = services.ledger.summary(Period::Month);
    println!("Budget");
    println!(
        "  today:       ${:.4} of ${:.2} ({:.0}%)",
        today.total_cost,
        today.budget.unwrap_or(0.0),
        today.percentage.unwrap_or(0.0)
    );
    println!(
        "  this month:  ${:.4} of ${:.2} ({:.0}%)",
        month.total_cost,
        month.budget.unwrap_or(0.0),
        month.percentage.unwrap_or(0.0)
    );

    let cache = services.cache.stats();
    println!("Cache");
    println!(
        "  {} entries, {} hits / {} misses ({:.0}% hit rate)",
        cache.size, cache.hits, cache.misses, cache.hit_rate_percent
    );

    let dream = services.dream.status();
    println!("Dream cycle");
    println!(
        "  idle: {} ({:.0}s), dreams recorded: {}",
        dream.is_idle, dream.idle_secs, dream.total_dreams
    );
    println!("  findings pending: {}", services.findings.pending_count());

    let health = services.monitor.check_health();
    println!("Host");
    println!(
        "  cpu {:.0}%, memory {:.0}%, disk {:.0}%{}",
        health.cpu,
        health.memory,
        health.disk,
        match health.temperature {
            Some(t) => format!(", {t:.0}C"),
            None => String::new(),
        }
    );
    if !health.alerts.is_empty() {
        println!("  alerts: {}", health.alerts.join(", "));
    }

    Ok(())
}
