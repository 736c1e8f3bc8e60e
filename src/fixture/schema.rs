//! Fixture file (fixture.json): a project snapshot plus save events to replay.
//!
//! JSON shape:
//! {
//!   "project_id": 14,
//!   "record_id_field": "record_id",
//!   "settings": { "dag-field": "site", "value-label-flag": true },
//!   "instruments": { "enrollment": ["record_id", "site"] },
//!   "choices": { "site": { "1": "Site A", "2": "Site B" } },
//!   "groups": [ { "id": 7, "name": "Site A" } ],
//!   "records": [ { "id": "101", "group": null, "data": { "site": "1" } } ],
//!   "events": [
//!     { "record": "101", "instrument": "enrollment", "set": { "site": "2" } }
//!   ]
//! }
//!
//! We validate ids, normalize setting values to strings, and build an
//! in-memory host.

use crate::fixture::host::FixtureHost;
use crate::groups::{Group, GroupId};

use anyhow::{Result, bail};
use serde::Deserialize;
use serde::de::Deserializer;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureSpec {
    #[serde(default = "default_project_id")]
    pub project_id: u64,

    #[serde(default = "default_record_id_field")]
    pub record_id_field: String,

    #[serde(default)]
    pub settings: BTreeMap<String, SettingValue>,

    #[serde(default)]
    pub instruments: BTreeMap<String, Vec<String>>,

    /// field -> raw value -> label
    #[serde(default)]
    pub choices: BTreeMap<String, BTreeMap<String, String>>,

    #[serde(default)]
    pub groups: Vec<Group>,

    #[serde(default)]
    pub records: Vec<RawRecord>,

    #[serde(default)]
    pub events: Vec<RawEvent>,
}

/// Settings may be written as JSON strings, booleans or numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Text(String),
    Flag(bool),
    Number(i64),
}

impl SettingValue {
    /// The string form the host would store.
    pub fn as_setting(&self) -> String {
        match self {
            SettingValue::Text(s) => s.clone(),
            SettingValue::Flag(true) => "1".to_string(),
            SettingValue::Flag(false) => "0".to_string(),
            SettingValue::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRecord {
    #[serde(deserialize_with = "deserialize_record_id")]
    pub id: String,

    #[serde(default)]
    pub group: Option<GroupId>,

    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// One save: field values written, then the save hook fired.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    #[serde(deserialize_with = "deserialize_record_id")]
    pub record: String,

    pub instrument: String,

    #[serde(default)]
    pub event_id: u64,

    #[serde(default)]
    pub set: BTreeMap<String, String>,

    /// Overrides the group the host reports as current. Defaults to the
    /// record's stored group.
    #[serde(default)]
    pub group_id: Option<String>,
}

/// Validated fixture: the host plus the events to replay against it.
#[derive(Debug)]
pub struct ValidatedFixture {
    pub host: FixtureHost,
    pub events: Vec<RawEvent>,
}

impl FixtureSpec {
    /// Check ids and references, then build the in-memory host.
    pub fn validate_and_build(&self) -> Result<ValidatedFixture> {
        if self.record_id_field.trim().is_empty() {
            bail!("record_id_field cannot be empty");
        }

        let mut seen_groups: BTreeSet<GroupId> = BTreeSet::new();
        for g in &self.groups {
            if !seen_groups.insert(g.id) {
                bail!("duplicate group id in fixture: {}", g.id);
            }
        }

        let mut seen_records: BTreeSet<&str> = BTreeSet::new();
        for r in &self.records {
            if !seen_records.insert(r.id.as_str()) {
                bail!("duplicate record id in fixture: {}", r.id);
            }
            if let Some(group) = r.group {
                if !seen_groups.contains(&group) {
                    bail!("record {} references missing group id {}", r.id, group);
                }
            }
        }

        for (i, ev) in self.events.iter().enumerate() {
            if !self.instruments.is_empty() && !self.instruments.contains_key(&ev.instrument) {
                bail!(
                    "event {} for record {} references unknown instrument {}",
                    i + 1,
                    ev.record,
                    ev.instrument
                );
            }
        }

        let mut host = FixtureHost::new(self.project_id).with_record_id_field(&self.record_id_field);
        for (key, value) in &self.settings {
            host = host.with_setting(key, value.as_setting());
        }
        for (name, fields) in &self.instruments {
            host = host.with_instrument(name, fields.iter().map(String::as_str));
        }
        for (field, labels) in &self.choices {
            for (raw, label) in labels {
                host = host.with_choice(field, raw, label);
            }
        }
        for g in &self.groups {
            host = host.with_group(g.id.0, &g.name);
        }
        for r in &self.records {
            host = host.with_record(&r.id, r.data.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            if let Some(group) = r.group {
                host = host.with_record_group(&r.id, group);
            }
        }

        Ok(ValidatedFixture {
            host,
            events: self.events.clone(),
        })
    }
}

fn default_project_id() -> u64 {
    1
}

fn default_record_id_field() -> String {
    "record_id".to_string()
}

fn deserialize_record_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    // Record ids are lookup keys; blank ones cannot be addressed.
    let s = String::deserialize(deserializer)?;

    if s.trim().is_empty() {
        return Err(serde::de::Error::custom("record id cannot be empty"));
    }
    Ok(s)
}
