use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::config::{self, Config};

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print the default configuration file location
    Path,
}

pub fn command(args: ConfigArgs, config: &Config) -> Result<()> {
    match args.command {
        ConfigCommands::Show => {
            let text = config.to_toml().context("Failed to render configuration")?;
            print!("{}", text);
        }
        ConfigCommands::Path => {
            let path = config::default_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
