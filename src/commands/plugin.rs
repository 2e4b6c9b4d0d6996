use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use pgcat_core::loader::SharedLibraryLoader;
use pgcat_core::origin::build_decorated_callbacks;
use std::path::PathBuf;

use crate::config::PluginConfig;
use crate::utils;

#[derive(Args)]
pub struct PluginArgs {
    #[command(subcommand)]
    command: PluginCommands,
}

#[derive(Subcommand)]
enum PluginCommands {
    /// Load the base output plugin, apply the local-origin filter, and list its callbacks
    ///
    /// The library must be a pgcat plugin (built with `export_output_plugin!`);
    /// any other library is rejected before its initializer runs.
    Check {
        /// Module path (default from configuration, e.g. $libdir/pgoutput)
        #[arg(long)]
        module: Option<String>,
        /// Initializer symbol (default from configuration)
        #[arg(long)]
        symbol: Option<String>,
        /// Directory `$libdir` expands to (default: configuration, then pg_config --pkglibdir)
        #[arg(long)]
        libdir: Option<PathBuf>,
    },
}

pub fn command(args: PluginArgs, plugin: &PluginConfig) -> Result<()> {
    match args.command {
        PluginCommands::Check {
            module,
            symbol,
            libdir,
        } => {
            let mut plugin = plugin.clone();
            if let Some(module) = module {
                plugin.module = module;
            }
            if let Some(symbol) = symbol {
                plugin.symbol = symbol;
            }
            let libdir = match libdir.or(plugin.libdir.clone()) {
                Some(libdir) => libdir,
                None => utils::pg_pkglibdir()
                    .context("No libdir configured and PostgreSQL could not be located")?,
            };

            let loader = SharedLibraryLoader::new(libdir);
            let base = plugin.base_plugin();
            tracing::info!(
                "Loading {} from {}",
                base.symbol,
                loader.expand_path(&base.module).display()
            );
            let callbacks = build_decorated_callbacks(&loader, &base)?;
            println!(
                "Output plugin {} initialized via {}",
                base.module, base.symbol
            );
            println!("Callbacks: {}", callbacks.populated_slots().join(", "));
            println!("Origin filter: local changes only");
        }
    }
    Ok(())
}
