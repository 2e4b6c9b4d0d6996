//! Entry points exposed to the surrounding SQL glue and decoding engine.
//!
//! The in-sync cache is process-wide: one instance per thread, created on
//! first use. It follows whichever session is passed in; switching to a
//! session it has not seen before discards the cached entries.

use crate::callbacks::OutputPluginCallbacks;
use crate::catalog::{Invalidation, InvalidationRegistry, RelationId, RelationResolver};
use crate::error::Result;
use crate::insync::InSyncCache;
use crate::loader::PluginLoader;
use crate::origin::{self, BasePlugin};

thread_local! {
    static IN_SYNC_CACHE: InSyncCache = InSyncCache::new();
}

/// Locks `schema.relation` for the session's transaction and reports whether
/// it has been marked in-sync.
pub fn check_in_sync<S>(session: &S, schema: &str, relation: &str) -> Result<bool>
where
    S: RelationResolver + InvalidationRegistry,
{
    IN_SYNC_CACHE.with(|cache| {
        cache.ensure_initialized(session);
        cache.lookup_and_check(session, schema, relation)
    })
}

pub fn mark_in_sync(relid: RelationId) {
    IN_SYNC_CACHE.with(|cache| cache.mark_in_sync(relid));
}

pub fn invalidate(invalidation: Invalidation) {
    IN_SYNC_CACHE.with(|cache| cache.invalidate(invalidation));
}

pub fn with_in_sync_cache<R>(f: impl FnOnce(&InSyncCache) -> R) -> R {
    IN_SYNC_CACHE.with(f)
}

/// Output plugin entry point: fills `callbacks` from the base plugin and
/// installs the local-origin filter.
pub fn output_plugin_init(
    loader: &dyn PluginLoader,
    callbacks: &mut OutputPluginCallbacks,
) -> Result<()> {
    origin::init_decorated(loader, &BasePlugin::default(), callbacks)
}
