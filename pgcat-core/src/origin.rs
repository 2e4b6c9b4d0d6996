//! Origin filtering layered over an existing output plugin.
//!
//! The base plugin fills the callback table as usual; afterwards only the
//! `filter_by_origin` slot is overwritten so that changes replayed from
//! another node are never replicated again. Every other slot is left exactly
//! as the base plugin set it.

use crate::callbacks::{DecodingContext, OriginId, OutputPluginCallbacks};
use crate::error::Result;
use crate::loader::PluginLoader;

pub const BASE_PLUGIN_MODULE: &str = "$libdir/pgoutput";
pub const PLUGIN_INIT_SYMBOL: &str = "_PG_output_plugin_init";

/// Where the base plugin's initializer lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasePlugin {
    pub module: String,
    pub symbol: String,
}

impl Default for BasePlugin {
    fn default() -> Self {
        Self {
            module: BASE_PLUGIN_MODULE.to_string(),
            symbol: PLUGIN_INIT_SYMBOL.to_string(),
        }
    }
}

/// Replicate local changes only.
pub fn replicate_local_only(_ctx: &DecodingContext, origin_id: OriginId) -> bool {
    origin_id.is_local()
}

pub fn decorate(callbacks: &mut OutputPluginCallbacks) {
    callbacks.filter_by_origin = Some(replicate_local_only);
}

/// Runs the base plugin's initializer on `callbacks`, then installs the
/// origin filter.
pub fn init_decorated(
    loader: &dyn PluginLoader,
    base: &BasePlugin,
    callbacks: &mut OutputPluginCallbacks,
) -> Result<()> {
    let plugin_init = loader.load_init(&base.module, &base.symbol)?;
    plugin_init.run(callbacks);
    decorate(callbacks);
    tracing::info!(
        "decorated output plugin {} with local-origin filter",
        base.module
    );
    Ok(())
}

pub fn build_decorated_callbacks(
    loader: &dyn PluginLoader,
    base: &BasePlugin,
) -> Result<OutputPluginCallbacks> {
    let mut callbacks = OutputPluginCallbacks::default();
    init_decorated(loader, base, &mut callbacks)?;
    Ok(callbacks)
}
