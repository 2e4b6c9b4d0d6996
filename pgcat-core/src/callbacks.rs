//! Output plugin callback table and the values handed to its callbacks.

use std::fmt;

use crate::catalog::QualifiedName;

/// Replication origin a change was produced by. `0` is the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct OriginId(u16);

impl OriginId {
    pub const LOCAL: OriginId = OriginId(0);

    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    pub const fn is_local(self) -> bool {
        self.0 == 0
    }
}

impl From<u16> for OriginId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

impl fmt::Display for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// WAL position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Lsn(u64);

impl Lsn {
    pub const fn new(lsn: u64) -> Self {
        Self(lsn)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Insert => "INSERT",
            ChangeAction::Update => "UPDATE",
            ChangeAction::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub relation: QualifiedName,
    pub action: ChangeAction,
    pub tuple: Option<String>,
}

/// A decoded transaction, in commit order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transaction {
    pub xid: u32,
    pub origin_id: OriginId,
    pub final_lsn: Lsn,
    pub changes: Vec<Change>,
    pub truncated: Vec<QualifiedName>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputType {
    #[default]
    Textual,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputPluginOptions {
    pub output_type: OutputType,
    pub receive_rewrites: bool,
}

/// State a decoding session shares with its output plugin.
#[derive(Debug, Clone, Default)]
pub struct DecodingContext {
    pub slot_name: String,
    /// Options passed by the client when starting replication.
    pub options: Vec<(String, String)>,
    pub output_options: OutputPluginOptions,
    /// Everything the plugin wrote, one entry per message.
    pub output: Vec<String>,
}

impl DecodingContext {
    pub fn new(slot_name: impl Into<String>) -> Self {
        Self {
            slot_name: slot_name.into(),
            ..Self::default()
        }
    }

    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((name.into(), value.into()));
        self
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn write(&mut self, message: impl Into<String>) {
        self.output.push(message.into());
    }
}

pub type StartupCallback = fn(&mut DecodingContext, bool);
pub type BeginCallback = fn(&mut DecodingContext, &Transaction);
pub type ChangeCallback = fn(&mut DecodingContext, &Transaction, &Change);
pub type TruncateCallback = fn(&mut DecodingContext, &Transaction, &[QualifiedName]);
pub type CommitCallback = fn(&mut DecodingContext, &Transaction, Lsn);
pub type MessageCallback = fn(&mut DecodingContext, Option<&Transaction>, Lsn, &str, &[u8]);
/// Returns `true` when changes from the origin must be replicated.
pub type FilterByOriginCallback = fn(&DecodingContext, OriginId) -> bool;
pub type ShutdownCallback = fn(&mut DecodingContext);

/// Hooks the decoding engine calls while streaming changes. Empty slots are
/// skipped; an empty `filter_by_origin` replicates every origin.
///
/// Shared-library plugins fill this table across the library boundary, so
/// its layout is fixed.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputPluginCallbacks {
    pub startup: Option<StartupCallback>,
    pub begin: Option<BeginCallback>,
    pub change: Option<ChangeCallback>,
    pub truncate: Option<TruncateCallback>,
    pub commit: Option<CommitCallback>,
    pub message: Option<MessageCallback>,
    pub filter_by_origin: Option<FilterByOriginCallback>,
    pub shutdown: Option<ShutdownCallback>,
}

impl OutputPluginCallbacks {
    /// Names of the slots that hold a callback.
    pub fn populated_slots(&self) -> Vec<&'static str> {
        [
            ("startup", self.startup.is_some()),
            ("begin", self.begin.is_some()),
            ("change", self.change.is_some()),
            ("truncate", self.truncate.is_some()),
            ("commit", self.commit.is_some()),
            ("message", self.message.is_some()),
            ("filter_by_origin", self.filter_by_origin.is_some()),
            ("shutdown", self.shutdown.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect()
    }
}
