//! Capabilities the engine needs from the data-capture platform.
//!
//! Everything here is host-owned: record storage, field metadata, group
//! management, calculated fields, mail and the audit log. Calls are
//! synchronous and are never retried.

use crate::error::HostError;
use crate::groups::{Group, GroupId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field values of one record, keyed by field name.
pub type RecordSnapshot = BTreeMap<String, String>;

pub trait Host {
    /// Fields belonging to `instrument`.
    fn field_names(&self, instrument: &str) -> Result<Vec<String>, HostError>;

    /// Name of the project's record identifier field.
    fn record_id_field(&self) -> Result<String, HostError>;

    /// Current values of `fields` for `record`. `None` when the host has no data for it.
    fn record_data(
        &self,
        project_id: u64,
        record: &str,
        fields: &[&str],
    ) -> Result<Option<RecordSnapshot>, HostError>;

    /// Label configured for `raw` in the choices of `field`.
    fn choice_label(&self, field: &str, raw: &str) -> Result<Option<String>, HostError>;

    /// All groups of the project, in host order.
    fn groups(&self) -> Result<Vec<Group>, HostError>;

    fn set_record_group(&self, record: &str, group: GroupId) -> Result<(), HostError>;

    /// Create a group named `name` and return its new id.
    fn create_group(&self, name: &str) -> Result<GroupId, HostError>;

    /// Recompute calculated fields that depend on these records.
    fn recalculate_fields(&self, records: &[String]) -> Result<(), HostError>;

    fn send_notification(&self, notification: &Notification) -> Result<(), HostError>;

    fn project_setting(&self, key: &str) -> Result<Option<String>, HostError>;

    /// Append a line to the project's audit log.
    fn log_message(&self, text: &str);
}

/// What the host passes on each record save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveEvent {
    pub project_id: u64,
    pub record: String,
    pub instrument: String,
    pub event_id: u64,

    /// Record's group before this save, as the host reports it.
    #[serde(default)]
    pub group_id: Option<String>,

    #[serde(default)]
    pub survey_hash: Option<String>,

    #[serde(default)]
    pub response_id: Option<String>,

    #[serde(default)]
    pub repeat_instance: Option<u32>,
}

impl SaveEvent {
    pub fn new(project_id: u64, record: impl Into<String>, instrument: impl Into<String>) -> Self {
        Self {
            project_id,
            record: record.into(),
            instrument: instrument.into(),
            event_id: 0,
            group_id: None,
            survey_hash: None,
            response_id: None,
            repeat_instance: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub to: Vec<String>,
    pub from: String,
    pub subject: String,
    pub body: String,
}
