//! Relation catalog boundary.
//!
//! The in-sync cache only ever talks to the catalog through two narrow traits:
//! [`RelationResolver`] turns a qualified name into a [`RelationId`] while
//! taking a session-scoped lock, and [`InvalidationRegistry`] accepts a
//! callback that is run whenever cached metadata about a relation may be
//! stale.
//!
//! [`SharedCatalog`] is an in-memory implementation of both, shared by any
//! number of [`Session`]s. Every session owns an invalidation inbox; DDL in
//! one session broadcasts into every inbox and each session drains its own
//! inbox at safe points (lock acquisition, or an explicit
//! [`Session::accept_invalidation_messages`]).

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};

/// First id handed out for user relations.
pub const FIRST_NORMAL_OBJECT_ID: u32 = 16384;

/// Messages a session may have queued before its inbox is collapsed into a
/// single cache reset.
pub const MAX_PENDING_INVALIDATIONS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationId(u32);

impl RelationId {
    /// Never names a relation. Doubles as the wildcard in invalidation messages.
    pub const INVALID: RelationId = RelationId(0);

    pub const fn new(oid: u32) -> Self {
        Self(oid)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl From<u32> for RelationId {
    fn from(oid: u32) -> Self {
        Self(oid)
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Schema-qualified relation name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName {
    pub schema: String,
    pub relation: String,
}

impl QualifiedName {
    pub fn new(schema: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            relation: relation.into(),
        }
    }

    /// Parses `schema.relation`. Both parts must be non-empty.
    pub fn parse(value: &str) -> Option<Self> {
        let (schema, relation) = value.split_once('.')?;
        if schema.is_empty() || relation.is_empty() {
            return None;
        }
        Some(Self::new(schema, relation))
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.relation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    AccessShare,
    RowExclusive,
    AccessExclusive,
}

impl LockMode {
    pub fn conflicts_with(self, other: LockMode) -> bool {
        matches!(self, LockMode::AccessExclusive) || matches!(other, LockMode::AccessExclusive)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::AccessShare => "AccessShareLock",
            LockMode::RowExclusive => "RowExclusiveLock",
            LockMode::AccessExclusive => "AccessExclusiveLock",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a relcache invalidation message covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation {
    Relation(RelationId),
    /// Identity unknown: everything cached about any relation is suspect.
    All,
}

impl From<RelationId> for Invalidation {
    fn from(relid: RelationId) -> Self {
        if relid.is_valid() {
            Invalidation::Relation(relid)
        } else {
            Invalidation::All
        }
    }
}

pub type RelcacheCallback = Box<dyn Fn(Invalidation)>;

pub trait RelationResolver {
    /// Resolves `name` and locks the relation in `lock` mode for the rest of
    /// the caller's transaction. With `missing_ok` an unknown name yields
    /// `Ok(None)`; without it, [`Error::UndefinedRelation`].
    fn resolve(
        &self,
        name: &QualifiedName,
        lock: LockMode,
        missing_ok: bool,
    ) -> Result<Option<RelationId>>;
}

/// Names one invalidation stream. Unique within the process and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistryId(u64);

impl RegistryId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RegistryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub trait InvalidationRegistry {
    /// Callbacks registered here see exactly the messages delivered through
    /// this id, and none sent before it existed.
    fn registry_id(&self) -> RegistryId;

    /// Registrations last for the lifetime of the registry; there is no
    /// unregister.
    fn register_relcache_callback(&self, callback: RelcacheCallback);
}

pub type SessionId = u32;

struct CatalogState {
    relations: HashMap<QualifiedName, RelationId>,
    next_oid: u32,
    locks: HashMap<RelationId, Vec<(SessionId, LockMode)>>,
    inboxes: HashMap<SessionId, VecDeque<Invalidation>>,
    next_session: SessionId,
}

impl Default for CatalogState {
    fn default() -> Self {
        Self {
            relations: HashMap::new(),
            next_oid: FIRST_NORMAL_OBJECT_ID,
            locks: HashMap::new(),
            inboxes: HashMap::new(),
            next_session: 1,
        }
    }
}

impl CatalogState {
    fn lookup(&self, name: &QualifiedName) -> Result<RelationId> {
        self.relations
            .get(name)
            .copied()
            .ok_or_else(|| Error::UndefinedRelation(name.clone()))
    }

    fn acquire(
        &mut self,
        session: SessionId,
        relid: RelationId,
        name: &QualifiedName,
        mode: LockMode,
    ) -> Result<()> {
        let holders = self.locks.entry(relid).or_default();
        if let Some((holder, _)) = holders
            .iter()
            .find(|(holder, held)| *holder != session && held.conflicts_with(mode))
        {
            return Err(Error::LockConflict {
                relation: name.clone(),
                mode,
                holder: *holder,
            });
        }
        if !holders.contains(&(session, mode)) {
            holders.push((session, mode));
        }
        Ok(())
    }

    fn release_all(&mut self, session: SessionId) {
        self.locks.retain(|_, holders| {
            holders.retain(|(holder, _)| *holder != session);
            !holders.is_empty()
        });
    }

    fn broadcast(&mut self, invalidation: Invalidation) {
        for (session, inbox) in self.inboxes.iter_mut() {
            if invalidation == Invalidation::All {
                inbox.clear();
            } else if inbox.len() >= MAX_PENDING_INVALIDATIONS {
                tracing::debug!("session {} fell behind, queueing cache reset", session);
                inbox.clear();
                inbox.push_back(Invalidation::All);
                continue;
            }
            inbox.push_back(invalidation);
        }
    }
}

/// Catalog shared by every session of one simulated server.
#[derive(Clone, Default)]
pub struct SharedCatalog {
    state: Arc<Mutex<CatalogState>>,
}

impl SharedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new session with its own invalidation inbox.
    pub fn connect(&self) -> Session {
        let mut state = self.state();
        let id = state.next_session;
        state.next_session += 1;
        state.inboxes.insert(id, VecDeque::new());
        tracing::debug!("session {} connected", id);
        Session {
            id,
            registry: RegistryId::next(),
            catalog: self.clone(),
            callbacks: RefCell::new(Vec::new()),
        }
    }

    /// Looks a relation up without locking or processing invalidations.
    pub fn relation_id(&self, name: &QualifiedName) -> Option<RelationId> {
        self.state().relations.get(name).copied()
    }

    fn state(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One backend: resolves names, takes locks, and receives invalidations.
///
/// Not `Send`: callbacks registered here are run on the session's own thread.
pub struct Session {
    id: SessionId,
    registry: RegistryId,
    catalog: SharedCatalog,
    callbacks: RefCell<Vec<RelcacheCallback>>,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn catalog(&self) -> &SharedCatalog {
        &self.catalog
    }

    /// Messages queued for the next safe point.
    pub fn pending_invalidations(&self) -> usize {
        self.catalog
            .state()
            .inboxes
            .get(&self.id)
            .map_or(0, VecDeque::len)
    }

    /// Drains this session's inbox, running every registered callback for
    /// every pending message. Returns the number of messages processed.
    pub fn accept_invalidation_messages(&self) -> usize {
        let pending: Vec<Invalidation> = {
            let mut state = self.catalog.state();
            match state.inboxes.get_mut(&self.id) {
                Some(inbox) => inbox.drain(..).collect(),
                None => Vec::new(),
            }
        };
        let callbacks = self.callbacks.borrow();
        for invalidation in &pending {
            tracing::trace!("session {} processing {:?}", self.id, invalidation);
            for callback in callbacks.iter() {
                callback(*invalidation);
            }
        }
        pending.len()
    }

    pub fn create_relation(&self, name: &QualifiedName) -> Result<RelationId> {
        let relid = {
            let mut state = self.catalog.state();
            if state.relations.contains_key(name) {
                return Err(Error::RelationExists(name.clone()));
            }
            let relid = RelationId::new(state.next_oid);
            state.next_oid += 1;
            state.relations.insert(name.clone(), relid);
            state.acquire(self.id, relid, name, LockMode::AccessExclusive)?;
            relid
        };
        tracing::debug!("session {} created {} ({})", self.id, name, relid);
        Ok(relid)
    }

    /// Schema change on an existing relation: takes an exclusive lock and
    /// broadcasts an invalidation for it to every session.
    pub fn alter_relation(&self, name: &QualifiedName) -> Result<RelationId> {
        let relid = {
            let mut state = self.catalog.state();
            let relid = state.lookup(name)?;
            state.acquire(self.id, relid, name, LockMode::AccessExclusive)?;
            state.broadcast(Invalidation::Relation(relid));
            relid
        };
        tracing::debug!("session {} altered {} ({})", self.id, name, relid);
        self.accept_invalidation_messages();
        Ok(relid)
    }

    pub fn drop_relation(&self, name: &QualifiedName) -> Result<RelationId> {
        let relid = {
            let mut state = self.catalog.state();
            let relid = state.lookup(name)?;
            state.acquire(self.id, relid, name, LockMode::AccessExclusive)?;
            state.relations.remove(name);
            state.broadcast(Invalidation::Relation(relid));
            relid
        };
        tracing::debug!("session {} dropped {} ({})", self.id, name, relid);
        self.accept_invalidation_messages();
        Ok(relid)
    }

    /// Broadcasts a wildcard invalidation, as happens when a backend falls
    /// too far behind the shared invalidation queue.
    pub fn reset_caches(&self) {
        self.catalog.state().broadcast(Invalidation::All);
        tracing::debug!("session {} broadcast relcache reset", self.id);
        self.accept_invalidation_messages();
    }

    /// Ends the current transaction, releasing every lock it holds.
    pub fn commit(&self) {
        self.catalog.state().release_all(self.id);
    }

    pub fn held_locks(&self) -> Vec<(RelationId, LockMode)> {
        let state = self.catalog.state();
        let mut held: Vec<(RelationId, LockMode)> = state
            .locks
            .iter()
            .flat_map(|(relid, holders)| {
                holders
                    .iter()
                    .filter(|(holder, _)| *holder == self.id)
                    .map(move |(_, mode)| (*relid, *mode))
            })
            .collect();
        held.sort_by_key(|(relid, _)| *relid);
        held
    }
}

impl RelationResolver for Session {
    fn resolve(
        &self,
        name: &QualifiedName,
        lock: LockMode,
        missing_ok: bool,
    ) -> Result<Option<RelationId>> {
        let relid = {
            let mut state = self.catalog.state();
            match state.relations.get(name).copied() {
                Some(relid) => {
                    state.acquire(self.id, relid, name, lock)?;
                    Some(relid)
                }
                None if missing_ok => None,
                None => return Err(Error::UndefinedRelation(name.clone())),
            }
        };
        // Lock acquisition is a safe point for invalidation delivery.
        self.accept_invalidation_messages();
        Ok(relid)
    }
}

impl InvalidationRegistry for Session {
    fn registry_id(&self) -> RegistryId {
        self.registry
    }

    fn register_relcache_callback(&self, callback: RelcacheCallback) {
        self.callbacks.borrow_mut().push(callback);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let mut state = self.catalog.state();
        state.release_all(self.id);
        state.inboxes.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn orders() -> QualifiedName {
        QualifiedName::new("public", "orders")
    }

    #[test]
    fn parses_qualified_names() {
        assert_eq!(QualifiedName::parse("public.orders"), Some(orders()));
        assert_eq!(
            QualifiedName::parse("sales.line.items"),
            Some(QualifiedName::new("sales", "line.items"))
        );
        assert!(QualifiedName::parse("orders").is_none());
        assert!(QualifiedName::parse(".orders").is_none());
        assert!(QualifiedName::parse("public.").is_none());
    }

    #[test]
    fn invalid_relation_id_maps_to_wildcard() {
        assert_eq!(Invalidation::from(RelationId::INVALID), Invalidation::All);
        assert_eq!(
            Invalidation::from(RelationId::new(16390)),
            Invalidation::Relation(RelationId::new(16390))
        );
    }

    #[test]
    fn relation_ids_start_at_first_normal_object_id() {
        let catalog = SharedCatalog::new();
        let session = catalog.connect();
        let first = session.create_relation(&orders()).unwrap();
        let second = session
            .create_relation(&QualifiedName::new("public", "customers"))
            .unwrap();
        assert_eq!(first.as_u32(), FIRST_NORMAL_OBJECT_ID);
        assert_eq!(second.as_u32(), FIRST_NORMAL_OBJECT_ID + 1);
        assert!(matches!(
            session.create_relation(&orders()),
            Err(Error::RelationExists(_))
        ));
    }

    #[test]
    fn resolve_honours_missing_ok() {
        let catalog = SharedCatalog::new();
        let session = catalog.connect();
        assert_eq!(
            session
                .resolve(&orders(), LockMode::AccessShare, true)
                .unwrap(),
            None
        );
        let err = session
            .resolve(&orders(), LockMode::AccessShare, false)
            .unwrap_err();
        assert_eq!(err.to_string(), "relation \"public.orders\" does not exist");
    }

    #[test]
    fn resolve_holds_lock_until_commit() {
        let catalog = SharedCatalog::new();
        let owner = catalog.connect();
        let relid = owner.create_relation(&orders()).unwrap();
        owner.commit();

        let reader = catalog.connect();
        reader
            .resolve(&orders(), LockMode::AccessShare, true)
            .unwrap();
        assert_eq!(reader.held_locks(), vec![(relid, LockMode::AccessShare)]);

        let err = owner.drop_relation(&orders()).unwrap_err();
        assert!(matches!(err, Error::LockConflict { holder, .. } if holder == reader.id()));
        assert!(catalog.relation_id(&orders()).is_some());

        reader.commit();
        assert!(reader.held_locks().is_empty());
        owner.drop_relation(&orders()).unwrap();
        assert!(catalog.relation_id(&orders()).is_none());
    }

    #[test]
    fn ddl_is_broadcast_to_every_session() {
        let catalog = SharedCatalog::new();
        let a = catalog.connect();
        let b = catalog.connect();
        let relid = a.create_relation(&orders()).unwrap();
        a.commit();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        b.register_relcache_callback(Box::new(move |inval: Invalidation| {
            sink.borrow_mut().push(inval)
        }));

        a.alter_relation(&orders()).unwrap();
        a.commit();
        assert!(seen.borrow().is_empty(), "delivery waits for a safe point");
        assert_eq!(b.accept_invalidation_messages(), 1);

        a.reset_caches();
        assert_eq!(b.accept_invalidation_messages(), 1);
        assert_eq!(
            *seen.borrow(),
            vec![Invalidation::Relation(relid), Invalidation::All]
        );
        assert_eq!(b.accept_invalidation_messages(), 0);
    }

    #[test]
    fn idle_session_inbox_collapses_into_a_reset() {
        let catalog = SharedCatalog::new();
        let owner = catalog.connect();
        let idle = catalog.connect();
        owner.create_relation(&orders()).unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        idle.register_relcache_callback(Box::new(move |inval: Invalidation| {
            sink.borrow_mut().push(inval)
        }));

        for _ in 0..MAX_PENDING_INVALIDATIONS {
            owner.alter_relation(&orders()).unwrap();
        }
        assert_eq!(idle.pending_invalidations(), MAX_PENDING_INVALIDATIONS);

        owner.alter_relation(&orders()).unwrap();
        assert_eq!(idle.pending_invalidations(), 1);
        assert_eq!(idle.accept_invalidation_messages(), 1);
        assert_eq!(*seen.borrow(), vec![Invalidation::All]);
    }

    #[test]
    fn wildcard_supersedes_queued_messages() {
        let catalog = SharedCatalog::new();
        let owner = catalog.connect();
        let idle = catalog.connect();
        owner.create_relation(&orders()).unwrap();

        owner.alter_relation(&orders()).unwrap();
        owner.alter_relation(&orders()).unwrap();
        owner.reset_caches();
        assert_eq!(idle.pending_invalidations(), 1);
    }

    #[test]
    fn every_session_is_its_own_registry() {
        let catalog = SharedCatalog::new();
        let a = catalog.connect();
        let b = catalog.connect();
        assert_ne!(a.registry_id(), b.registry_id());
        assert_eq!(a.registry_id(), a.registry_id());
    }

    #[test]
    fn dropping_a_session_releases_its_locks() {
        let catalog = SharedCatalog::new();
        let owner = catalog.connect();
        owner.create_relation(&orders()).unwrap();
        owner.commit();

        let reader = catalog.connect();
        reader
            .resolve(&orders(), LockMode::AccessShare, false)
            .unwrap();
        drop(reader);

        owner.alter_relation(&orders()).unwrap();
    }
}
