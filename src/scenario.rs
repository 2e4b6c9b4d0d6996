// ABOUTME: Scenario files describing multi-session workloads against the in-sync cache
// ABOUTME: Parses TOML step lists and replays them against an in-memory catalog

use anyhow::{bail, Context, Result};
use pgcat_core::callbacks::{
    Change, ChangeAction, DecodingContext, Lsn, OriginId, OutputPluginCallbacks, Transaction,
};
use pgcat_core::catalog::{QualifiedName, Session, SharedCatalog};
use pgcat_core::decoding::DecodingSession;
use pgcat_core::insync::InSyncCache;
use pgcat_core::loader::PluginLoader;
use pgcat_core::origin::{build_decorated_callbacks, BasePlugin};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::utils::parse_relation_name;

/// A scenario: an ordered list of steps, each run by a named session
///
/// ```toml
/// [[steps]]
/// session = "a"
/// action = "create"
/// relation = "public.orders"
///
/// [[steps]]
/// session = "a"
/// action = "check"
/// relation = "public.orders"
/// expect = false
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub slot_name: Option<String>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    pub session: String,
    #[serde(flatten)]
    pub action: Action,
    /// Expected result of a `check` or `decode` step
    #[serde(default)]
    pub expect: Option<bool>,
    /// Substring the step's error message must contain
    #[serde(default)]
    pub expect_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Create { relation: String },
    Alter { relation: String },
    Drop { relation: String },
    /// Broadcast a wildcard invalidation
    Reset,
    /// Process pending invalidation messages
    Accept,
    Check { relation: String },
    Mark { relation: String },
    Commit,
    Decode {
        origin: u16,
        #[serde(default)]
        xid: Option<u32>,
        #[serde(default)]
        relation: Option<String>,
        #[serde(default)]
        tuple: Option<String>,
    },
}

impl Action {
    fn yields_bool(&self) -> bool {
        matches!(self, Action::Check { .. } | Action::Decode { .. })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create { relation } => write!(f, "create {}", relation),
            Action::Alter { relation } => write!(f, "alter {}", relation),
            Action::Drop { relation } => write!(f, "drop {}", relation),
            Action::Reset => write!(f, "reset"),
            Action::Accept => write!(f, "accept"),
            Action::Check { relation } => write!(f, "check {}", relation),
            Action::Mark { relation } => write!(f, "mark {}", relation),
            Action::Commit => write!(f, "commit"),
            Action::Decode { origin, .. } => write!(f, "decode origin={}", origin),
        }
    }
}

impl Scenario {
    pub fn from_toml(contents: &str) -> Result<Self> {
        let scenario: Scenario =
            toml::from_str(contents).context("Failed to parse scenario file")?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario from {:?}", path))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid scenario in {:?}", path))
    }

    /// Reject steps that cannot be run before any of them is
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            bail!("Scenario has no steps");
        }
        for (index, step) in self.steps.iter().enumerate() {
            let number = index + 1;
            if step.session.trim().is_empty() {
                bail!("Step {} has an empty session name", number);
            }
            if step.expect.is_some() && !step.action.yields_bool() {
                bail!(
                    "Step {} ({}): expect only applies to check and decode steps",
                    number,
                    step.action
                );
            }
            match &step.action {
                Action::Create { relation }
                | Action::Alter { relation }
                | Action::Drop { relation }
                | Action::Check { relation }
                | Action::Mark { relation } => {
                    parse_relation_name(relation)
                        .with_context(|| format!("Step {} ({})", number, step.action))?;
                }
                Action::Decode {
                    relation: Some(relation),
                    ..
                } => {
                    parse_relation_name(relation)
                        .with_context(|| format!("Step {} ({})", number, step.action))?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Outcome of one executed step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub number: usize,
    pub session: String,
    pub action: String,
    pub result: String,
    pub matched: bool,
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:>3}] {:<8} {:<32} {}{}",
            self.number,
            self.session,
            self.action,
            self.result,
            if self.matched { "" } else { "  (MISMATCH)" }
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScenarioReport {
    pub outcomes: Vec<StepOutcome>,
    /// Decoded output per session
    pub output: BTreeMap<String, Vec<String>>,
}

impl ScenarioReport {
    pub fn mismatches(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.matched).count()
    }
}

struct Process {
    session: Session,
    cache: InSyncCache,
    decoder: Option<DecodingSession>,
    next_xid: u32,
}

/// Replays scenarios against a fresh in-memory catalog. Each session gets its
/// own in-sync cache, the way each backend process has its own.
pub struct ScenarioRunner<'a> {
    catalog: SharedCatalog,
    processes: BTreeMap<String, Process>,
    loader: &'a dyn PluginLoader,
    base: BasePlugin,
    callbacks: Option<OutputPluginCallbacks>,
    next_lsn: u64,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(loader: &'a dyn PluginLoader, base: BasePlugin) -> Self {
        Self {
            catalog: SharedCatalog::new(),
            processes: BTreeMap::new(),
            loader,
            base,
            callbacks: None,
            next_lsn: 0x0100_0000,
        }
    }

    pub fn run(&mut self, scenario: &Scenario) -> Result<ScenarioReport> {
        let slot_name = scenario.slot_name.as_deref().unwrap_or("pgcat");
        let mut report = ScenarioReport::default();

        for (index, step) in scenario.steps.iter().enumerate() {
            let number = index + 1;
            let outcome = match self.execute(&step.session, &step.action, slot_name) {
                Ok((result, value)) => {
                    let matched = match (step.expect, value) {
                        (Some(expected), Some(actual)) => expected == actual,
                        _ => step.expect_error.is_none(),
                    };
                    StepOutcome {
                        number,
                        session: step.session.clone(),
                        action: step.action.to_string(),
                        result,
                        matched,
                    }
                }
                Err(e) => match &step.expect_error {
                    Some(expected) => StepOutcome {
                        number,
                        session: step.session.clone(),
                        action: step.action.to_string(),
                        result: format!("error: {}", e),
                        matched: e.to_string().contains(expected.as_str()),
                    },
                    None => {
                        return Err(e).with_context(|| {
                            format!("Step {} ({} {}) failed", number, step.session, step.action)
                        })
                    }
                },
            };
            if !outcome.matched {
                tracing::warn!("Step {} did not match its expectation: {}", number, outcome);
            }
            report.outcomes.push(outcome);
        }

        for (name, process) in std::mem::take(&mut self.processes) {
            if let Some(decoder) = process.decoder {
                report.output.insert(name, decoder.finish().output);
            }
        }
        Ok(report)
    }

    fn process(&mut self, name: &str) -> &mut Process {
        let catalog = &self.catalog;
        self.processes
            .entry(name.to_string())
            .or_insert_with(|| Process {
                session: catalog.connect(),
                cache: InSyncCache::new(),
                decoder: None,
                next_xid: 700,
            })
    }

    fn decorated_callbacks(&mut self) -> Result<OutputPluginCallbacks> {
        if let Some(callbacks) = self.callbacks {
            return Ok(callbacks);
        }
        let callbacks = build_decorated_callbacks(self.loader, &self.base)
            .with_context(|| format!("Failed to initialize output plugin {}", self.base.module))?;
        self.callbacks = Some(callbacks);
        Ok(callbacks)
    }

    /// Run one action; returns the printable result and, for check and
    /// decode, its boolean value.
    fn execute(
        &mut self,
        session: &str,
        action: &Action,
        slot_name: &str,
    ) -> Result<(String, Option<bool>)> {
        match action {
            Action::Create { relation } => {
                let name = parse_relation_name(relation)?;
                let relid = self.process(session).session.create_relation(&name)?;
                Ok((format!("created {}", relid), None))
            }
            Action::Alter { relation } => {
                let name = parse_relation_name(relation)?;
                let relid = self.process(session).session.alter_relation(&name)?;
                Ok((format!("altered {}", relid), None))
            }
            Action::Drop { relation } => {
                let name = parse_relation_name(relation)?;
                let relid = self.process(session).session.drop_relation(&name)?;
                Ok((format!("dropped {}", relid), None))
            }
            Action::Reset => {
                self.process(session).session.reset_caches();
                Ok(("reset".to_string(), None))
            }
            Action::Accept => {
                let count = self.process(session).session.accept_invalidation_messages();
                Ok((format!("accepted {} message(s)", count), None))
            }
            Action::Check { relation } => {
                let name = parse_relation_name(relation)?;
                let process = self.process(session);
                process.cache.ensure_initialized(&process.session);
                let in_sync =
                    process
                        .cache
                        .lookup_and_check(&process.session, &name.schema, &name.relation)?;
                Ok((in_sync.to_string(), Some(in_sync)))
            }
            Action::Mark { relation } => {
                let name = parse_relation_name(relation)?;
                let Some(relid) = self.catalog.relation_id(&name) else {
                    bail!("relation {} does not exist", name);
                };
                let process = self.process(session);
                let stored = process.cache.is_initialized();
                process.cache.mark_in_sync(relid);
                let result = if stored {
                    format!("marked {}", relid)
                } else {
                    format!("ignored {} (cache not initialized)", relid)
                };
                Ok((result, None))
            }
            Action::Commit => {
                self.process(session).session.commit();
                Ok(("committed".to_string(), None))
            }
            Action::Decode {
                origin,
                xid,
                relation,
                tuple,
            } => {
                let callbacks = self.decorated_callbacks()?;
                let changes = match relation {
                    Some(relation) => vec![Change {
                        relation: parse_relation_name(relation)?,
                        action: ChangeAction::Insert,
                        tuple: tuple.clone(),
                    }],
                    None => Vec::new(),
                };
                self.next_lsn += 0x60;
                let final_lsn = Lsn::new(self.next_lsn);

                let process = self.process(session);
                let xid = xid.unwrap_or_else(|| {
                    process.next_xid += 1;
                    process.next_xid
                });
                let txn = Transaction {
                    xid,
                    origin_id: OriginId::new(*origin),
                    final_lsn,
                    changes,
                    truncated: Vec::<QualifiedName>::new(),
                };
                let decoder = process.decoder.get_or_insert_with(|| {
                    DecodingSession::start(callbacks, DecodingContext::new(slot_name))
                });
                let streamed = decoder.decode(&txn);
                let result = if streamed {
                    format!("streamed xid {}", xid)
                } else {
                    format!("skipped xid {} (origin {})", xid, origin)
                };
                Ok((result, Some(streamed)))
            }
        }
    }
}
