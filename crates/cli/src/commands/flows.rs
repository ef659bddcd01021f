//! `healthflow flows`: List the flows and their output contracts.

use healthflow_flows::handlers;

pub fn run() -> anyhow::Result<()> {
    println!("HealthFlow flows");
    println!("================\n");

    for handler in handlers::builtin() {
        let contract = handler.contract();
        println!("{} ({})", handler.kind(), contract.name);
        println!("  primary field: {}", contract.primary_field);
        for field in &contract.fields {
            let marker = if field.required { "" } else { "?" };
            println!("  - {}{marker}", field.name);
        }
        let caps = contract.list_caps();
        if !caps.is_empty() {
            let caps: Vec<String> = caps.iter().map(|(name, max)| format!("{name} ≤ {max}")).collect();
            println!("  bounded lists: {}", caps.join(", "));
        }
        println!();
    }

    Ok(())
}
