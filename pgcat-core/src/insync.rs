//! Process-local cache of relations marked in-sync.
//!
//! The cache is a pure membership hint. It has no expiry of its own: an
//! entry lives until a relcache invalidation for its relation arrives, and a
//! wildcard invalidation throws the whole store away. The store is rebuilt
//! lazily by the next lookup, but the invalidation callback is registered
//! only once per registry for the lifetime of the cache, no matter how often
//! the store is recreated.
//!
//! A cache consulted through a registry it has not seen before cannot know
//! what that registry delivered earlier, so binding to a new registry starts
//! from an empty store.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use crate::catalog::{
    Invalidation, InvalidationRegistry, LockMode, QualifiedName, RegistryId, RelationId,
    RelationResolver,
};
use crate::error::{Error, Result};

/// Capacity hint for a freshly created store. Growth is unbounded.
pub const INITIAL_CAPACITY: usize = 128;

type RelationSet = HashSet<RelationId>;

#[derive(Debug, Default)]
pub struct InSyncCache {
    store: Rc<RefCell<Option<RelationSet>>>,
    registered_with: RefCell<Vec<RegistryId>>,
    current_registry: Cell<Option<RegistryId>>,
}

impl InSyncCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the store if it does not exist. The first use of each
    /// registry also registers the invalidation callback with it.
    pub fn ensure_initialized(&self, registry: &dyn InvalidationRegistry) {
        let id = registry.registry_id();
        if self.current_registry.get() != Some(id) {
            self.bind(registry, id);
        }
        if self.store.borrow().is_some() {
            return;
        }
        *self.store.borrow_mut() = Some(RelationSet::with_capacity(INITIAL_CAPACITY));
        tracing::debug!("created in-sync relation cache");
    }

    fn bind(&self, registry: &dyn InvalidationRegistry, id: RegistryId) {
        let first_visit = !self.registered_with.borrow().contains(&id);
        if first_visit {
            // Nothing this registry delivered before now has reached the store.
            invalidate_store(&self.store, Invalidation::All);

            let store = Rc::downgrade(&self.store);
            registry.register_relcache_callback(Box::new(move |invalidation: Invalidation| {
                if let Some(store) = store.upgrade() {
                    invalidate_store(&store, invalidation);
                }
            }));
            self.registered_with.borrow_mut().push(id);
            tracing::info!(
                "registered relcache invalidation callback with registry {} for in-sync cache",
                id
            );
        }
        self.current_registry.set(Some(id));
    }

    /// Resolves `schema.relation` under an AccessShare lock and reports
    /// whether the relation is marked in-sync.
    ///
    /// The lock is left to the caller's transaction. A name that does not
    /// resolve is an error; a store discarded by an invalidation delivered
    /// during resolution simply reports "not in-sync".
    pub fn lookup_and_check(
        &self,
        resolver: &dyn RelationResolver,
        schema: &str,
        relation: &str,
    ) -> Result<bool> {
        let name = QualifiedName::new(schema, relation);
        let relid = resolver
            .resolve(&name, LockMode::AccessShare, true)?
            .filter(|relid| relid.is_valid())
            .ok_or_else(|| Error::RelationNotFound {
                schema: schema.to_string(),
                relation: relation.to_string(),
            })?;
        Ok(self.contains(relid))
    }

    pub fn contains(&self, relid: RelationId) -> bool {
        self.store
            .borrow()
            .as_ref()
            .is_some_and(|relations| relations.contains(&relid))
    }

    /// Marks `relid` in-sync. Silently dropped while no store exists.
    pub fn mark_in_sync(&self, relid: RelationId) {
        match self.store.borrow_mut().as_mut() {
            Some(relations) => {
                relations.insert(relid);
            }
            None => tracing::trace!("in-sync cache not initialized, dropping mark for {}", relid),
        }
    }

    pub fn invalidate(&self, invalidation: Invalidation) {
        invalidate_store(&self.store, invalidation);
    }

    pub fn is_initialized(&self) -> bool {
        self.store.borrow().is_some()
    }

    pub fn len(&self) -> usize {
        self.store.borrow().as_ref().map_or(0, RelationSet::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Runs at invalidation safe points; must not fail and must tolerate a missing store.
fn invalidate_store(store: &RefCell<Option<RelationSet>>, invalidation: Invalidation) {
    let mut store = store.borrow_mut();
    match invalidation {
        Invalidation::Relation(relid) => {
            if let Some(relations) = store.as_mut() {
                relations.remove(&relid);
            }
        }
        Invalidation::All => {
            if store.take().is_some() {
                tracing::debug!("discarded in-sync relation cache");
            }
        }
    }
}
