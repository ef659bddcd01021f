//! `healthflow worker`: Deliver due follow-up check-ins.

use healthflow_effects::{FollowUpWorker, SideEffectCoordinator};
use std::sync::Arc;
use tracing::info;

pub async fn run(once: bool) -> anyhow::Result<()> {
    let config = super::load_config()?;
    let coordinator = SideEffectCoordinator::from_config(&config).await?;
    let worker = FollowUpWorker::new(coordinator.store(), coordinator.notifier(), &config.scheduler)
        .with_audit(coordinator.audit());

    if once {
        let delivered = worker.run_once().await?;
        println!("Delivered {delivered} follow-up(s)");
        return Ok(());
    }

    println!("HealthFlow follow-up worker");
    println!("   Store:    {}", config.store.resolved_path().display());
    println!("   Interval: {}s", worker.poll_interval().as_secs());

    let handle = Arc::new(worker).spawn();
    tokio::signal::ctrl_c().await?;
    handle.abort();
    info!("Follow-up worker stopped");
    Ok(())
}
