//! Budget ledger: per-provider usage accounting and spend gating.
//!
//! The [`BudgetLedger`] is the single authority on "am I allowed to spend
//! X?". It accumulates per-provider-model token counts and cost, buckets
//! spend by local calendar day and month, and answers gate checks against
//! the configured daily and monthly hard stops.
//!
//! Thread safety: all public methods take `&self` and use interior
//! mutability via [`std::sync::RwLock`].
//!
//! Persistence is best-effort: state flushes to `cost_usage.json` every few
//! records and on shutdown. A crash loses at most the unflushed tail, and
//! the loss direction is under-counting (the agent gets slightly more
//! budget than intended, never less). Persistence failures are logged and
//! never surface to callers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use archi_llm::ModelPricing;

/// How many records between automatic flushes to disk.
const FLUSH_EVERY: u64 = 10;

// ── Accumulators ────────────────────────────────────────────────────────

/// Running totals for one `provider/model` pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// Serializable ledger state (`cost_usage.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerState {
    /// Keyed by `provider/model`.
    usage: HashMap<String, ProviderUsage>,
    /// Keyed by local calendar day, `YYYY-MM-DD`.
    daily_usage: HashMap<String, f64>,
    /// Keyed by local calendar month, `YYYY-MM`.
    monthly_usage: HashMap<String, f64>,
    #[serde(default)]
    last_updated: Option<chrono::DateTime<chrono::Utc>>,
}

// ── Gate check result ───────────────────────────────────────────────────

/// Result of a budget gate check.
///
/// Not an error: `permitted = false` is an expected outcome the router
/// answers by substituting the local provider or refusing the request.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetCheck {
    pub permitted: bool,
    /// `within_budget`, `daily_budget_exceeded`, or `monthly_budget_exceeded`.
    pub reason: &'static str,
    pub daily_spent: f64,
    pub daily_limit: f64,
    pub monthly_spent: f64,
    pub monthly_limit: f64,
}

/// Reporting window for [`BudgetLedger::summary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Today,
    Month,
    All,
}

/// Derived usage view for telemetry and UIs.
#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub period: String,
    pub total_cost: f64,
    /// The applicable limit; `None` for the all-time view.
    pub budget: Option<f64>,
    /// Spend as a percent of the limit; `None` when no limit applies.
    pub percentage: Option<f64>,
    pub total_calls: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    /// Per `provider/model` breakdown (all-time view only).
    pub by_provider: HashMap<String, ProviderUsage>,
}

// ── BudgetLedger ────────────────────────────────────────────────────────

/// Persistent record of per-provider spend with daily/monthly hard stops.
pub struct BudgetLedger {
    state: RwLock<LedgerState>,
    pricing: HashMap<String, ModelPricing>,
    daily_limit: f64,
    monthly_limit: f64,
    data_dir: Option<PathBuf>,
    /// Records since the last flush; guarded by the state lock's writers.
    unflushed: RwLock<u64>,
}

impl BudgetLedger {
    /// Create an in-memory ledger with the given hard stops.
    pub fn new(daily_limit_usd: f64, monthly_limit_usd: f64) -> Self {
        info!(
            daily_limit_usd,
            monthly_limit_usd, "budget ledger initialized"
        );
        Self {
            state: RwLock::new(LedgerState::default()),
            pricing: HashMap::new(),
            daily_limit: daily_limit_usd,
            monthly_limit: monthly_limit_usd,
            data_dir: None,
            unflushed: RwLock::new(0),
        }
    }

    /// Enable persistence under `data_dir` and load any prior snapshot.
    ///
    /// A missing or corrupt `cost_usage.json` is logged and ignored; the
    /// ledger starts from zero in that case.
    pub fn with_data_dir(mut self, data_dir: PathBuf) -> Self {
        let path = data_dir.join("cost_usage.json");
        match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<LedgerState>(&text) {
                Ok(loaded) => {
                    *self.state.write().expect("budget ledger lock poisoned") = loaded;
                    info!(path = %path.display(), "loaded usage data from disk");
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "corrupt usage data, starting empty");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to read usage data");
            }
        }
        self.data_dir = Some(data_dir);
        self
    }

    /// Register a price table entry for a provider.
    ///
    /// Used when `record` is called without an explicit cost. Zero-priced
    /// providers (the local model) may be recorded but never trip the gate.
    pub fn with_pricing(mut self, provider: impl Into<String>, pricing: ModelPricing) -> Self {
        self.pricing.insert(provider.into(), pricing);
        self
    }

    /// The configured daily hard stop.
    pub fn daily_limit(&self) -> f64 {
        self.daily_limit
    }

    // ── Recording ───────────────────────────────────────────────────

    /// Record one API call.
    ///
    /// `cost_usd = None` computes the cost from the provider's price table
    /// (0 when the provider has no entry). Accumulators and the current
    /// day/month buckets are incremented atomically; every few records the
    /// state flushes to disk.
    pub fn record(
        &self,
        provider: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: Option<f64>,
    ) {
        let cost = cost_usd.unwrap_or_else(|| {
            self.pricing
                .get(provider)
                .map(|p| p.cost(input_tokens, output_tokens))
                .unwrap_or(0.0)
        });

        {
            let mut state = self.state.write().expect("budget ledger lock poisoned");
            let key = format!("{provider}/{model}");
            let entry = state.usage.entry(key.clone()).or_default();
            entry.calls += 1;
            entry.input_tokens += input_tokens;
            entry.output_tokens += output_tokens;
            entry.cost_usd += cost;

            let (today, month) = local_buckets();
            *state.daily_usage.entry(today).or_insert(0.0) += cost;
            *state.monthly_usage.entry(month).or_insert(0.0) += cost;
            state.last_updated = Some(chrono::Utc::now());

            debug!(key = %key, cost_usd = cost, "recorded usage");
        }

        let due = {
            let mut unflushed = self.unflushed.write().expect("budget ledger lock poisoned");
            *unflushed += 1;
            *unflushed >= FLUSH_EVERY
        };
        if due {
            self.flush();
        }
    }

    // ── Gate check ──────────────────────────────────────────────────

    /// Would a request costing `estimated_cost` stay within both limits?
    pub fn check(&self, estimated_cost: f64) -> BudgetCheck {
        let state = self.state.read().expect("budget ledger lock poisoned");
        let (today, month) = local_buckets();
        let daily_spent = state.daily_usage.get(&today).copied().unwrap_or(0.0);
        let monthly_spent = state.monthly_usage.get(&month).copied().unwrap_or(0.0);

        let mut check = BudgetCheck {
            permitted: true,
            reason: "within_budget",
            daily_spent,
            daily_limit: self.daily_limit,
            monthly_spent,
            monthly_limit: self.monthly_limit,
        };

        if daily_spent + estimated_cost > self.daily_limit {
            check.permitted = false;
            check.reason = "daily_budget_exceeded";
        } else if monthly_spent + estimated_cost > self.monthly_limit {
            check.permitted = false;
            check.reason = "monthly_budget_exceeded";
        }
        check
    }

    // ── Summaries ───────────────────────────────────────────────────

    /// Usage totals for the requested window.
    pub fn summary(&self, period: Period) -> UsageSummary {
        let state = self.state.read().expect("budget ledger lock poisoned");
        let (today, month) = local_buckets();

        match period {
            Period::Today => {
                let total = state.daily_usage.get(&today).copied().unwrap_or(0.0);
                UsageSummary {
                    period: format!("today ({today})"),
                    total_cost: total,
                    budget: Some(self.daily_limit),
                    percentage: percent_of(total, self.daily_limit),
                    total_calls: 0,
                    total_input_tokens: 0,
                    total_output_tokens: 0,
                    by_provider: HashMap::new(),
                }
            }
            Period::Month => {
                let total = state.monthly_usage.get(&month).copied().unwrap_or(0.0);
                UsageSummary {
                    period: format!("month ({month})"),
                    total_cost: total,
                    budget: Some(self.monthly_limit),
                    percentage: percent_of(total, self.monthly_limit),
                    total_calls: 0,
                    total_input_tokens: 0,
                    total_output_tokens: 0,
                    by_provider: HashMap::new(),
                }
            }
            Period::All => UsageSummary {
                period: "all_time".into(),
                total_cost: state.usage.values().map(|u| u.cost_usd).sum(),
                budget: None,
                percentage: None,
                total_calls: state.usage.values().map(|u| u.calls).sum(),
                total_input_tokens: state.usage.values().map(|u| u.input_tokens).sum(),
                total_output_tokens: state.usage.values().map(|u| u.output_tokens).sum(),
                by_provider: state.usage.clone(),
            },
        }
    }

    // ── Persistence ─────────────────────────────────────────────────

    /// Flush current state to `cost_usage.json`.
    ///
    /// Atomic write (temp file + rename). Failures are logged, never raised.
    pub fn flush(&self) {
        let Some(ref data_dir) = self.data_dir else {
            return;
        };
        let snapshot = self
            .state
            .read()
            .expect("budget ledger lock poisoned")
            .clone();

        let path = data_dir.join("cost_usage.json");
        if let Err(e) = write_atomic(&path, &snapshot) {
            error!(path = %path.display(), error = %e, "failed to save usage data");
            return;
        }
        *self.unflushed.write().expect("budget ledger lock poisoned") = 0;
        debug!(path = %path.display(), "saved usage data");
    }
}

/// Current local-calendar bucket keys: (`YYYY-MM-DD`, `YYYY-MM`).
fn local_buckets() -> (String, String) {
    let now = Local::now();
    (
        now.format("%Y-%m-%d").to_string(),
        now.format("%Y-%m").to_string(),
    )
}

fn percent_of(total: f64, budget: f64) -> Option<f64> {
    (budget > 0.0).then(|| total / budget * 100.0)
}

fn write_atomic<T: Serialize>(path: &std::path::Path, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)
}
