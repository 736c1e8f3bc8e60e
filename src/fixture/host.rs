use crate::error::HostError;
use crate::groups::{Group, GroupId};
use crate::host::{Host, Notification, RecordSnapshot, SaveEvent};

use serde::Serialize;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

/// Mutating or outbound host call, in the order the engine made it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "call", rename_all = "kebab-case")]
pub enum HostCall {
    SetRecordGroup { record: String, group: GroupId },
    CreateGroup { name: String, group: GroupId },
    RecalculateFields { records: Vec<String> },
    SendNotification { notification: Notification },
}

#[derive(Debug, Clone, Default)]
struct StoredRecord {
    data: RecordSnapshot,
    group: Option<GroupId>,
}

/// In-memory project that records every call the engine makes.
///
/// Used by the `replay` command and as the host double in tests.
#[derive(Debug, Default)]
pub struct FixtureHost {
    project_id: u64,
    record_id_field: String,
    settings: BTreeMap<String, String>,
    instruments: BTreeMap<String, Vec<String>>,
    choices: BTreeMap<String, BTreeMap<String, String>>,
    groups: RefCell<Vec<Group>>,
    records: RefCell<BTreeMap<String, StoredRecord>>,
    failing: BTreeSet<&'static str>,
    calls: RefCell<Vec<HostCall>>,
    audit_log: RefCell<Vec<String>>,
}

impl FixtureHost {
    pub fn new(project_id: u64) -> Self {
        Self {
            project_id,
            record_id_field: "record_id".to_string(),
            ..Self::default()
        }
    }

    pub fn with_record_id_field(mut self, field: &str) -> Self {
        self.record_id_field = field.to_string();
        self
    }

    pub fn with_setting(mut self, key: &str, value: impl Into<String>) -> Self {
        self.settings.insert(key.to_string(), value.into());
        self
    }

    pub fn with_instrument<'a>(mut self, name: &str, fields: impl IntoIterator<Item = &'a str>) -> Self {
        self.instruments
            .insert(name.to_string(), fields.into_iter().map(str::to_string).collect());
        self
    }

    pub fn with_choice(mut self, field: &str, raw: &str, label: &str) -> Self {
        self.choices
            .entry(field.to_string())
            .or_default()
            .insert(raw.to_string(), label.to_string());
        self
    }

    pub fn with_group(self, id: u64, name: &str) -> Self {
        self.groups.borrow_mut().push(Group::new(id, name));
        self
    }

    pub fn with_record<'a>(
        self,
        record: &str,
        data: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let mut snapshot: RecordSnapshot = data
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        snapshot
            .entry(self.record_id_field.clone())
            .or_insert_with(|| record.to_string());
        self.records.borrow_mut().insert(
            record.to_string(),
            StoredRecord {
                data: snapshot,
                group: None,
            },
        );
        self
    }

    pub fn with_record_group(self, record: &str, group: GroupId) -> Self {
        if let Some(stored) = self.records.borrow_mut().get_mut(record) {
            stored.group = Some(group);
        }
        self
    }

    /// Make every call of the named host operation fail.
    pub fn failing(mut self, operation: &'static str) -> Self {
        self.failing.insert(operation);
        self
    }

    /// Write a field value, creating the record when it does not exist yet.
    pub fn set_field(&self, record: &str, field: &str, value: &str) {
        let mut records = self.records.borrow_mut();
        let stored = records.entry(record.to_string()).or_default();
        stored
            .data
            .entry(self.record_id_field.clone())
            .or_insert_with(|| record.to_string());
        stored.data.insert(field.to_string(), value.to_string());
    }

    pub fn record_group(&self, record: &str) -> Option<GroupId> {
        self.records.borrow().get(record).and_then(|r| r.group)
    }

    pub fn record_groups(&self) -> BTreeMap<String, Option<GroupId>> {
        self.records
            .borrow()
            .iter()
            .map(|(id, r)| (id.clone(), r.group))
            .collect()
    }

    /// A save event as the host would fire it, carrying the record's stored group.
    pub fn save_event(&self, record: &str, instrument: &str) -> SaveEvent {
        let mut event = SaveEvent::new(self.project_id, record, instrument);
        event.group_id = self.record_group(record).map(|g| g.to_string());
        event
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.borrow().clone()
    }

    pub fn audit_log(&self) -> Vec<String> {
        self.audit_log.borrow().clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                HostCall::SendNotification { notification } => Some(notification.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn group_sets(&self) -> Vec<(String, GroupId)> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                HostCall::SetRecordGroup { record, group } => Some((record.clone(), *group)),
                _ => None,
            })
            .collect()
    }

    /// Forget recorded calls and audit lines, keeping project state.
    pub fn clear_journal(&self) {
        self.calls.borrow_mut().clear();
        self.audit_log.borrow_mut().clear();
    }

    fn check(&self, operation: &'static str) -> Result<(), HostError> {
        if self.failing.contains(operation) {
            return Err(HostError::new(operation, "injected failure"));
        }
        Ok(())
    }
}

impl Host for FixtureHost {
    fn field_names(&self, instrument: &str) -> Result<Vec<String>, HostError> {
        self.check("field_names")?;
        Ok(self.instruments.get(instrument).cloned().unwrap_or_default())
    }

    fn record_id_field(&self) -> Result<String, HostError> {
        self.check("record_id_field")?;
        Ok(self.record_id_field.clone())
    }

    fn record_data(
        &self,
        project_id: u64,
        record: &str,
        fields: &[&str],
    ) -> Result<Option<RecordSnapshot>, HostError> {
        self.check("record_data")?;
        if project_id != self.project_id {
            return Ok(None);
        }
        let records = self.records.borrow();
        Ok(records.get(record).map(|stored| {
            fields
                .iter()
                .filter_map(|f| stored.data.get(*f).map(|v| (f.to_string(), v.clone())))
                .collect()
        }))
    }

    fn choice_label(&self, field: &str, raw: &str) -> Result<Option<String>, HostError> {
        self.check("choice_label")?;
        Ok(self.choices.get(field).and_then(|c| c.get(raw)).cloned())
    }

    fn groups(&self) -> Result<Vec<Group>, HostError> {
        self.check("groups")?;
        Ok(self.groups.borrow().clone())
    }

    fn set_record_group(&self, record: &str, group: GroupId) -> Result<(), HostError> {
        self.check("set_record_group")?;
        let mut records = self.records.borrow_mut();
        let Some(stored) = records.get_mut(record) else {
            return Err(HostError::new("set_record_group", format!("unknown record {record}")));
        };
        stored.group = Some(group);
        self.calls.borrow_mut().push(HostCall::SetRecordGroup {
            record: record.to_string(),
            group,
        });
        Ok(())
    }

    fn create_group(&self, name: &str) -> Result<GroupId, HostError> {
        self.check("create_group")?;
        let mut groups = self.groups.borrow_mut();
        let id = GroupId(groups.iter().map(|g| g.id.0).max().unwrap_or(0) + 1);
        groups.push(Group {
            id,
            name: name.to_string(),
        });
        self.calls.borrow_mut().push(HostCall::CreateGroup {
            name: name.to_string(),
            group: id,
        });
        Ok(id)
    }

    fn recalculate_fields(&self, records: &[String]) -> Result<(), HostError> {
        self.check("recalculate_fields")?;
        self.calls.borrow_mut().push(HostCall::RecalculateFields {
            records: records.to_vec(),
        });
        Ok(())
    }

    fn send_notification(&self, notification: &Notification) -> Result<(), HostError> {
        self.check("send_notification")?;
        self.calls.borrow_mut().push(HostCall::SendNotification {
            notification: notification.clone(),
        });
        Ok(())
    }

    fn project_setting(&self, key: &str) -> Result<Option<String>, HostError> {
        self.check("project_setting")?;
        Ok(self.settings.get(key).cloned())
    }

    fn log_message(&self, text: &str) {
        self.audit_log.borrow_mut().push(text.to_string());
    }
}
