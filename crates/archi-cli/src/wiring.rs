//! Service construction and wiring.
//!
//! Builds every control-plane service in dependency order from the config
//! directory and environment. Providers are OpenAI-compatible endpoints:
//! the local one defaults to a llama.cpp server on localhost (free), the
//! remote one to OpenRouter (priced, gated by the budget ledger).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use archi_core::action_log::ActionLogger;
use archi_core::budget::BudgetLedger;
use archi_core::cache::ResponseCache;
use archi_core::dream::DreamCycle;
use archi_core::executor::PlanExecutor;
use archi_core::findings::FindingsQueue;
use archi_core::goals::GoalStore;
use archi_core::heartbeat::AdaptiveScheduler;
use archi_core::monitor::SystemMonitor;
use archi_core::router::ModelRouter;
use archi_core::safety::SafetyController;
use archi_core::tools::ToolRegistry;
use archi_llm::{
    BreakerConfig, CircuitBreaker, CompletionProvider, ModelPricing, OpenAiCompatProvider,
    ProviderConfig, RetryConfig, RetryPolicy,
};
use archi_types::Config;

use crate::approval::StdinApproval;

/// Default OpenRouter pricing per million tokens (grok-class models).
const DEFAULT_INPUT_PER_1M: f64 = 0.20;
const DEFAULT_OUTPUT_PER_1M: f64 = 1.00;

/// All wired services, ready for a subcommand to use.
pub struct Services {
    pub config: Config,
    pub data_dir: PathBuf,
    pub ledger: Arc<BudgetLedger>,
    pub cache: Arc<ResponseCache>,
    pub router: Arc<ModelRouter>,
    pub goal_store: Arc<GoalStore>,
    pub tools: Arc<ToolRegistry>,
    pub executor: Arc<PlanExecutor>,
    pub scheduler: Arc<AdaptiveScheduler>,
    pub dream: Arc<DreamCycle>,
    pub monitor: Arc<SystemMonitor>,
    pub safety: Arc<SafetyController>,
    pub action_log: Arc<ActionLogger>,
    pub findings: Arc<FindingsQueue>,
    /// Provider used for decomposition and plan steps: the local model
    /// when wired, otherwise the remote API.
    pub planner: Arc<dyn CompletionProvider>,
}

impl Services {
    /// Build everything under `project_root`.
    pub fn build(project_root: &Path) -> Self {
        let config_dir = project_root.join("config");
        let config = Config::load(&config_dir);
        let data_dir = Config::data_dir(&config_dir);

        let ledger = Arc::new(
            BudgetLedger::new(config.budget.daily_limit_usd, config.budget.monthly_limit_usd)
                .with_data_dir(data_dir.clone())
                .with_pricing("local", ModelPricing::free())
                .with_pricing(
                    "openrouter",
                    ModelPricing {
                        input_per_million: DEFAULT_INPUT_PER_1M,
                        output_per_million: DEFAULT_OUTPUT_PER_1M,
                    },
                ),
        );

        let mut cache = ResponseCache::new(
            Duration::from_secs(config.cache.ttl_secs),
            config.cache.max_entries,
        );
        if config.cache.durable {
            cache = cache.with_durable_dir(&data_dir);
        }
        let cache = Arc::new(cache);

        let local = Arc::new(local_provider()) as Arc<dyn CompletionProvider>;
        let remote = Arc::new(remote_provider()) as Arc<dyn CompletionProvider>;

        let router = Arc::new(ModelRouter::new(
            Some(local.clone()),
            remote,
            cache.clone(),
            ledger.clone(),
            config.monitoring.budget_warning_pct,
        ));

        let goal_store = Arc::new(GoalStore::new(data_dir.clone()));
        let tools = Arc::new(archi_tools::default_registry(
            project_root.to_path_buf(),
            std::env::var("ARCHI_SEARCH_ENDPOINT").ok(),
        ));
        let executor = Arc::new(
            PlanExecutor::new(
                config.executor.clone(),
                project_root.to_path_buf(),
                data_dir.clone(),
            )
            .with_verification(),
        );

        let scheduler = Arc::new(AdaptiveScheduler::new(&config.heartbeat));
        let dream = Arc::new(DreamCycle::new(config.dream.clone()));
        let monitor = Arc::new(SystemMonitor::new(
            config.monitoring.cpu_threshold,
            config.monitoring.memory_threshold,
            config.monitoring.temp_threshold,
            config.monitoring.disk_threshold,
        ));
        let safety = Arc::new(SafetyController::new(
            config.risk_levels.clone(),
            project_root.to_path_buf(),
            Box::new(StdinApproval),
        ));
        let action_log = Arc::new(ActionLogger::new(&data_dir));
        let findings = Arc::new(FindingsQueue::new(&data_dir));

        Self {
            config,
            data_dir,
            ledger,
            cache,
            router,
            goal_store,
            tools,
            executor,
            scheduler,
            dream,
            monitor,
            safety,
            action_log,
            findings,
            planner: local,
        }
    }
}

/// The local model: a llama.cpp / vLLM server with zero pricing. A
/// circuit breaker keeps a dead server from stalling every tick.
fn local_provider() -> CircuitBreaker<RetryPolicy<OpenAiCompatProvider>> {
    let base_url = std::env::var("ARCHI_LOCAL_BASE_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:8080/v1".into());
    let model =
        std::env::var("ARCHI_LOCAL_MODEL").unwrap_or_else(|_| "qwen3-8b-instruct".into());
    CircuitBreaker::new(
        RetryPolicy::new(
            OpenAiCompatProvider::new(ProviderConfig {
                name: "local".into(),
                base_url,
                api_key_env: String::new(),
                model,
                pricing: ModelPricing::free(),
                // Multimodal llama.cpp builds accept image parts; a
                // text-only build surfaces the failure and the router
                // falls back.
                vision: true,
            }),
            RetryConfig {
                // Local inference can be slow but a retry won't make it faster.
                max_attempts: 1,
                call_timeout: Duration::from_secs(300),
                ..Default::default()
            },
        ),
        BreakerConfig::default(),
    )
}

/// The remote API: OpenRouter by default, priced and budget-gated.
fn remote_provider() -> RetryPolicy<OpenAiCompatProvider> {
    let base_url = std::env::var("ARCHI_REMOTE_BASE_URL")
        .unwrap_or_else(|_| "https://openrouter.ai/api/v1".into());
    let model = std::env::var("ARCHI_REMOTE_MODEL").unwrap_or_else(|_| "x-ai/grok-4-fast".into());
    RetryPolicy::new(
        OpenAiCompatProvider::new(ProviderConfig {
            name: "openrouter".into(),
            base_url,
            api_key_env: "OPENROUTER_API_KEY".into(),
            model,
            pricing: ModelPricing {
                input_per_million: DEFAULT_INPUT_PER_1M,
                output_per_million: DEFAULT_OUTPUT_PER_1M,
            },
            vision: false,
        }),
        RetryConfig::default(),
    )
}
