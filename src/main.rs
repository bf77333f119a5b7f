//! budget-swarm - run one task from the command line.
//!
//! Usage: `budget-swarm <task description...>`

use std::sync::Arc;

use budget_swarm::{
    agents::Orchestrator, config::Config, cost::PricingTable, events,
    llm::OpenRouterClient, tools::ToolRegistry, OrchestratorSettings, TaskRequest,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "budget_swarm=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let description = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if description.trim().is_empty() {
        anyhow::bail!("usage: budget-swarm <task description...>");
    }

    // Fails fast on missing credentials, before any spend.
    let config = Config::from_env()?;
    info!(
        model = %config.default_model,
        budget_usd = config.default_budget_usd,
        "Loaded configuration"
    );

    let pricing = Arc::new(
        PricingTable::with_defaults().with_overrides(config.pricing_overrides.clone()),
    );
    let llm = Arc::new(OpenRouterClient::new(config.api_key.clone(), Arc::clone(&pricing)));
    let orchestrator = Orchestrator::new(llm, ToolRegistry::new())
        .with_pricing(pricing)
        .with_settings(OrchestratorSettings::from_config(&config));

    tokio::spawn(events::log_events(orchestrator.subscribe()));

    let mut request = TaskRequest::new(description, config.default_budget_usd, config.default_model.clone());
    if let Ok(repo) = std::env::var("TASK_REPO") {
        request = request.with_repo(repo);
    }

    let result = orchestrator.run_task(request).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
