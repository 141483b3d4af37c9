//! Discover command implementation.
//!
//! Prints the type:revision pairs a fetch cycle would poll.

use pipeline_monitor_exporter::{discover, Config, Connector};
use std::time::Instant;

/// Lists the monitored pairs after applying the ignore lists.
pub fn command_discover(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let connector = config.connector()?;
    let executor = connector.connect()?;
    let policy = config.selection_policy();

    let start = Instant::now();
    let targets = discover(executor.as_ref(), &config.command_builder(), &policy)?;

    println!(
        "🔎 {} targets on {} ({:.2}s)",
        targets.len(),
        executor.target(),
        start.elapsed().as_secs_f64()
    );
    if policy.newest_only {
        println!("   (newest revision per type only)");
    }
    println!();
    for target in &targets {
        println!("{}", target);
    }
    Ok(())
}
