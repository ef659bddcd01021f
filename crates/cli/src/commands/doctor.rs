//! `healthflow doctor`: Diagnose configuration, backends and the job store.

use healthflow_config::AppConfig;
use healthflow_core::flow::BackendChoice;
use healthflow_effects::{JobStore, SideEffectCoordinator};

pub async fn run() -> anyhow::Result<()> {
    println!("HealthFlow doctor");
    println!("=================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if !config_path.exists() {
        println!("  ⚠️  No config file, using defaults (run `healthflow config init`)");
    }

    let config = match super::load_config() {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ {e:#}");
            return Ok(());
        }
    };

    if config.has_primary_key() {
        println!("  ✅ Primary API key configured");
    } else {
        println!("  ⚠️  No primary API key (set HEALTHFLOW_API_KEY or GEMINI_API_KEY)");
        issues += 1;
    }

    let router = healthflow_providers::build_from_config(&config);
    for choice in [BackendChoice::Primary, BackendChoice::Fallback] {
        let backend = router.get(choice);
        match backend.provider.health_check().await {
            Ok(true) => println!("  ✅ {} backend reachable ({}, {})", choice.as_str(), backend.provider.name(), backend.model),
            Ok(false) => {
                println!("  ⚠️  {} backend answered with an error ({})", choice.as_str(), backend.provider.name());
                issues += 1;
            }
            Err(e) => {
                println!("  ❌ {} backend unreachable: {e}", choice.as_str());
                issues += 1;
            }
        }
    }

    match SideEffectCoordinator::from_config(&config).await {
        Ok(coordinator) => match coordinator.store().pending_count().await {
            Ok(pending) => println!("  ✅ Job store open ({pending} pending follow-up(s))"),
            Err(e) => {
                println!("  ❌ Job store query failed: {e}");
                issues += 1;
            }
        },
        Err(e) => {
            println!("  ❌ Job store unavailable: {e}");
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  All checks passed");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }
    Ok(())
}
