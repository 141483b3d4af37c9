//! Check command implementation.
//!
//! Validates the configuration and the execution channel: opens a session,
//! lists the pipeline types and reports what came back.

use pipeline_monitor_exporter::executor::run_classified;
use pipeline_monitor_exporter::selector::listing;
use pipeline_monitor_exporter::{validate_effective_config, Config, Connector};

/// Validates configuration and connectivity to the target.
pub fn command_check(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Pipeline Monitor Exporter - Connectivity Check");
    println!("=================================================");

    let mut all_ok = true;

    println!("\n⚙️  Checking configuration...");
    match validate_effective_config(config) {
        Ok(_) => println!("   ✅ Configuration is valid"),
        Err(e) => {
            println!("   ❌ Configuration invalid: {}", e);
            all_ok = false;
        }
    }

    if all_ok {
        println!("\n🔌 Opening session...");
        let connector = config.connector()?;
        match connector.connect() {
            Ok(executor) => {
                println!("   ✅ Connected to {}", executor.target());

                let commands = config.command_builder();
                let command = commands.list_types();
                println!("\n📋 Listing types: {}", command);
                match run_classified(executor.as_ref(), &command) {
                    Ok(output) => {
                        let types = listing(&output.stdout);
                        if types.is_empty() {
                            println!("   ⚠️  No types reported");
                            if !output.stderr.trim().is_empty() {
                                println!("   stderr: {}", output.stderr.trim());
                            }
                        } else {
                            println!("   ✅ {} types reported", types.len());
                            for name in &types {
                                let ignored = config.ignore_types.contains(name);
                                println!(
                                    "      {} {}",
                                    if ignored { "⏭️ " } else { "├─" },
                                    name
                                );
                            }
                        }
                    }
                    Err(e) => {
                        println!("   ❌ {}", e);
                        all_ok = false;
                    }
                }
            }
            Err(e) => {
                println!("   ❌ Connection failed: {}", e);
                all_ok = false;
            }
        }
    }

    println!("\n📋 Summary:");
    if all_ok {
        println!("   ✅ All checks passed - exporter is ready");
        Ok(())
    } else {
        println!("   ❌ Some checks failed - please review the output above");
        std::process::exit(1);
    }
}
