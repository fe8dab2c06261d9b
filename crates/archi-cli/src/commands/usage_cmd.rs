//! `archi usage` -- budget ledger summaries.

use std::path::Path;

use archi_core::budget::Period;

use crate::wiring::Services;

pub fn execute(project_root: &Path, period: &str) -> anyhow::Result<()> {
    let services = Services::build(project_root);

    let period = match period {
        "today" => Period::Today,
        "month" => Period::Month,
        "all" => Period::All,
        other => anyhow::bail!("unknown period '{other}' (expected today, month, or all)"),
    };

    let summary = services.ledger.summary(period);
    println!("{}", summary.period);
    println!("  total cost:  ${:.4}", summary.total_cost);
    if let (Some(budget), Some(percentage)) = (summary.budget, summary.percentage) {
        println!("  budget:      ${budget:.2} ({percentage:.0}% used)");
    }
    if !summary.by_provider.is_empty() {
        println!("  by provider:");
        let mut keys: Vec<_> = summary.by_provider.keys().collect();
        keys.sort();
        for key in keys {
            let usage = &summary.by_provider[key];
            println!(
                "    {key}: {} calls, {} in / {} out tokens, ${:.4}",
                usage.calls, usage.input_tokens, usage.output_tokens, usage.cost_usd
            );
        }
    }
    Ok(())
}
