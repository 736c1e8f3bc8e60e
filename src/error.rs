//! Error kinds for a single save-event evaluation.
//!
//! Every variant is local to one record. `AssignmentEngine::on_record_saved`
//! is the only place that swallows them.

use crate::groups::GroupId;
use thiserror::Error;

/// A host capability call that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("host call {operation} failed: {message}")]
pub struct HostError {
    pub operation: &'static str,
    pub message: String,
}

impl HostError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssignError {
    /// No trigger field configured. Treated as a silent no-op.
    #[error("no DAG field configured")]
    MissingConfiguration,

    #[error("invalid value {value:?} for setting {key}: {reason}")]
    InvalidSetting {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to retrieve data for record {record}")]
    DataRetrieval { record: String },

    #[error("cannot resolve group for {key:?}: {reason}")]
    GroupResolution { key: String, reason: String },

    #[error("DAG assignment failed for record {record} (current group {current:?}, match key {key:?}): {reason}")]
    AssignmentFailure {
        record: String,
        current: Option<GroupId>,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Host(#[from] HostError),
}

impl AssignError {
    pub fn resolution(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::GroupResolution {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Short tag used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingConfiguration => "missing-configuration",
            Self::InvalidSetting { .. } => "invalid-setting",
            Self::DataRetrieval { .. } => "data-retrieval",
            Self::GroupResolution { .. } => "group-resolution",
            Self::AssignmentFailure { .. } => "assignment-failure",
            Self::Host(_) => "unexpected",
        }
    }
}

pub type Result<T> = std::result::Result<T, AssignError>;
