// ABOUTME: Configuration file handling for pgcat
// ABOUTME: Loads logging and base output plugin settings from TOML

use anyhow::{Context, Result};
use pgcat_core::origin::{BasePlugin, BASE_PLUGIN_MODULE, PLUGIN_INIT_SYMBOL};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub plugin: PluginConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default tracing filter when neither RUST_LOG nor --log is given
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Where the base output plugin lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Module path; a leading `$libdir` expands to `libdir`
    pub module: String,
    /// Initializer symbol exported by the module
    pub symbol: String,
    /// PostgreSQL package library directory. When unset, scenarios use the
    /// built-in text output plugin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub libdir: Option<PathBuf>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            module: BASE_PLUGIN_MODULE.to_string(),
            symbol: PLUGIN_INIT_SYMBOL.to_string(),
            libdir: None,
        }
    }
}

impl PluginConfig {
    pub fn base_plugin(&self) -> BasePlugin {
        BasePlugin {
            module: self.module.clone(),
            symbol: self.symbol.clone(),
        }
    }
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse pgcat configuration")
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize pgcat configuration")
    }
}

/// Get the default configuration path (~/.pgcat/config.toml)
pub fn default_path() -> Result<PathBuf> {
    let home_dir =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
    Ok(home_dir.join(".pgcat").join("config.toml"))
}

/// Load configuration.
///
/// An explicit path must exist. Without one, `~/.pgcat/config.toml` is used
/// when present and defaults apply otherwise.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let path = default_path()?;
            if !path.exists() {
                return Ok(Config::default());
            }
            path
        }
    };
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read configuration from {:?}", path))?;
    Config::from_toml(&contents).with_context(|| format!("Invalid configuration in {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.log.level, "info");
        assert_eq!(config.plugin.module, "$libdir/pgoutput");
        assert_eq!(config.plugin.symbol, "_PG_output_plugin_init");
        assert!(config.plugin.libdir.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [plugin]
            libdir = "/usr/lib/postgresql/16/lib"
            "#,
        )
        .unwrap();
        assert_eq!(config.log.level, "info");
        assert_eq!(config.plugin.module, "$libdir/pgoutput");
        assert_eq!(
            config.plugin.libdir.as_deref(),
            Some(Path::new("/usr/lib/postgresql/16/lib"))
        );
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[log]\nlevel = \"debug\"\n\n[plugin]\nmodule = \"$libdir/decoder\"\nsymbol = \"decoder_init\"\n",
        )
        .unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.log.level, "debug");
        assert_eq!(
            config.plugin.base_plugin(),
            BasePlugin {
                module: "$libdir/decoder".to_string(),
                symbol: "decoder_init".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let dir = tempdir().unwrap();
        let err = load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read configuration"));
    }

    #[test]
    fn test_serialized_config_parses_back() {
        let config = Config::default();
        let text = config.to_toml().unwrap();
        assert!(text.contains("[plugin]"));
        assert!(!text.contains("libdir"));
        assert_eq!(Config::from_toml(&text).unwrap(), config);
    }
}
