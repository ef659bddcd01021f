//! `healthflow serve`: Start the HTTP gateway.

use healthflow_core::event::EventBus;
use healthflow_effects::FollowUpWorker;
use healthflow_flows::FlowRunner;
use std::sync::Arc;

pub async fn run(port_override: Option<u16>, no_worker: bool) -> anyhow::Result<()> {
    let mut config = super::load_config()?;
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    if !config.has_primary_key() {
        tracing::warn!("No primary API key configured; primary-backend requests will return the apology");
    }

    let runner = Arc::new(FlowRunner::assemble(&config, Arc::new(EventBus::default())).await?);

    let worker = if no_worker {
        None
    } else {
        let coordinator = runner.coordinator();
        let worker = FollowUpWorker::new(coordinator.store(), coordinator.notifier(), &config.scheduler)
            .with_audit(coordinator.audit());
        Some(Arc::new(worker).spawn())
    };

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    println!("HealthFlow gateway");
    println!("   Listening:      {addr}");
    println!("   Default backend: {}", config.generation.default_backend.as_str());
    println!("   Follow-ups:     {}", if worker.is_some() { "worker running" } else { "disabled" });

    let result = healthflow_gateway::serve(runner, &addr).await;
    if let Some(handle) = worker {
        handle.abort();
    }
    result?;
    Ok(())
}
