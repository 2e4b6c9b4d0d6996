use anyhow::{bail, Result};
use pgcat_core::loader::{PluginLoader, SharedLibraryLoader, SymbolTable};
use pgcat_core::origin::BasePlugin;
use pgcat_core::text_output;
use std::path::Path;

use crate::config::PluginConfig;
use crate::scenario::{Scenario, ScenarioReport, ScenarioRunner};

/// Replay a scenario file and print one line per step
///
/// Uses the shared library named by the plugin configuration when a libdir
/// is configured, and the built-in text output plugin otherwise. Fails when
/// any step does not match its expectation.
pub fn run(path: &Path, plugin: &PluginConfig) -> Result<ScenarioReport> {
    let scenario = Scenario::load(path)?;
    tracing::info!(
        "Running scenario {:?} ({} steps)",
        path,
        scenario.steps.len()
    );

    let report = match &plugin.libdir {
        Some(libdir) => {
            let loader = SharedLibraryLoader::new(libdir);
            replay(&scenario, &loader, plugin.base_plugin())?
        }
        None => {
            let loader = SymbolTable::new().with(
                text_output::MODULE,
                &plugin.symbol,
                text_output::plugin_init,
            );
            let base = BasePlugin {
                module: text_output::MODULE.to_string(),
                symbol: plugin.symbol.clone(),
            };
            replay(&scenario, &loader, base)?
        }
    };

    for outcome in &report.outcomes {
        println!("{}", outcome);
    }
    for (session, lines) in &report.output {
        println!();
        println!("-- decoded output for {}", session);
        for line in lines {
            println!("{}", line);
        }
    }

    let mismatches = report.mismatches();
    if mismatches > 0 {
        bail!("{} step(s) did not match their expectation", mismatches);
    }
    println!();
    println!("All {} steps passed", report.outcomes.len());
    Ok(report)
}

fn replay(
    scenario: &Scenario,
    loader: &dyn PluginLoader,
    base: BasePlugin,
) -> Result<ScenarioReport> {
    ScenarioRunner::new(loader, base).run(scenario)
}
