use std::path::PathBuf;

use thiserror::Error;

use crate::catalog::{LockMode, QualifiedName};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A lookup asked for a relation that does not exist (missing_ok resolution).
    #[error("relation not found: {schema}.{relation}")]
    RelationNotFound { schema: String, relation: String },

    #[error("relation \"{0}\" does not exist")]
    UndefinedRelation(QualifiedName),

    #[error("relation \"{0}\" already exists")]
    RelationExists(QualifiedName),

    #[error("could not obtain {mode} on relation \"{relation}\": held by session {holder}")]
    LockConflict {
        relation: QualifiedName,
        mode: LockMode,
        holder: u32,
    },

    #[error("could not access file {path:?}: {reason}")]
    ModuleLoad { path: PathBuf, reason: String },

    #[error("{path:?} is not a compatible pgcat output plugin: {reason}")]
    IncompatiblePlugin { path: PathBuf, reason: String },

    #[error("output plugins have to declare the {symbol} symbol")]
    MissingInitSymbol { module: String, symbol: String },
}
