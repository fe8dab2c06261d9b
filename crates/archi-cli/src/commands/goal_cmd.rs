//! `archi goal` -- goal management.

use std::path::Path;

use crate::wiring::Services;

pub async fn add(
    project_root: &Path,
    description: &str,
    intent: &str,
    priority: u8,
) -> anyhow::Result<()> {
    let services = Services::build(project_root);
    let goal = services.goal_store.create_goal(description, intent, priority);
    println!("created {} (priority {})", goal.goal_id, goal.priority);

    // Decompose immediately so the next dream cycle has ready tasks.
    match services
        .goal_store
        .decompose_goal(&goal.goal_id, &*services.planner)
        .await
    {
        Ok(tasks) => {
            println!("decomposed into {} tasks:", tasks.len());
            for task in tasks {
                println!("  {}  {}", task.task_id, task.description);
            }
        }
        Err(e) => {
            println!("decomposition deferred ({e}); a dream cycle will retry");
        }
    }
    Ok(())
}

pub fn list(project_root: &Path) -> anyhow::Result<()> {
    let services = Services::build(project_root);
    let goals = services.goal_store.goals();
    if goals.is_empty() {
        println!("no goals");
        return Ok(());
    }
    for goal in goals {
        println!(
            "{}  [p{}] {:.0}%  {}",
            goal.goal_id, goal.priority, goal.completion_percentage, goal.description
        );
        for task in &goal.tasks {
            println!("    {}  {:?}  {}", task.task_id, task.status, task.description);
        }
    }
    Ok(())
}
