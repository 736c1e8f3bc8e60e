//! Offline host: JSON fixtures, replay, and configuration checks.
//!
//! This module is intentionally separate from the engine. It owns:
//! - the fixture schema (fixture.json) and its validation
//! - `FixtureHost`, an in-memory `Host` with a call journal
//! - `replay` and `check`, used by the CLI

pub mod host;
pub mod schema;

pub use host::{FixtureHost, HostCall};
pub use schema::{FixtureSpec, RawEvent, ValidatedFixture};

use crate::engine::{AssignmentEngine, Outcome};
use crate::error::AssignError;
use crate::groups::{GroupId, GroupMap};
use crate::host::Host;
use crate::settings::{DuplicateSuffixPolicy, MatchGroupBy, Settings};

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Serialize)]
pub struct ReplayEntry {
    pub record: String,
    pub instrument: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub events: Vec<ReplayEntry>,
    pub calls: Vec<HostCall>,
    pub audit_log: Vec<String>,
    pub record_groups: BTreeMap<String, Option<GroupId>>,
}

/// Apply each event's field writes, then fire the save hook for it.
pub fn replay(fixture: &ValidatedFixture) -> ReplayReport {
    let host = &fixture.host;
    let engine = AssignmentEngine::new(host);

    let mut events = Vec::with_capacity(fixture.events.len());
    for ev in &fixture.events {
        for (field, value) in &ev.set {
            host.set_field(&ev.record, field, value);
        }

        let mut event = host.save_event(&ev.record, &ev.instrument);
        event.event_id = ev.event_id;
        if let Some(group) = &ev.group_id {
            event.group_id = Some(group.clone());
        }

        let outcome = engine.on_record_saved(&event);
        events.push(ReplayEntry {
            record: ev.record.clone(),
            instrument: ev.instrument.clone(),
            outcome,
        });
    }

    ReplayReport {
        events,
        calls: host.calls(),
        audit_log: host.audit_log(),
        record_groups: host.record_groups(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    pub severity: Severity,
    pub message: String,
}

impl Problem {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

/// Report configuration problems that would make assignments fail or
/// depend on host ordering.
pub fn check<H: Host + ?Sized>(host: &H, instruments: &[&str]) -> Vec<Problem> {
    let mut problems = Vec::new();

    let settings = match Settings::load(host) {
        Ok(s) => s,
        Err(AssignError::MissingConfiguration) => {
            problems.push(Problem::error("dag-field is not set; no record will be assigned"));
            return problems;
        }
        Err(err) => {
            problems.push(Problem::error(err.to_string()));
            return problems;
        }
    };

    let mut on_some_instrument = false;
    for name in instruments {
        match host.field_names(name) {
            Ok(fields) => on_some_instrument |= fields.iter().any(|f| *f == settings.dag_field),
            Err(err) => problems.push(Problem::error(err.to_string())),
        }
    }
    if !instruments.is_empty() && !on_some_instrument {
        problems.push(Problem::warning(format!(
            "dag-field {} is not on any instrument",
            settings.dag_field
        )));
    }

    for address in &settings.rejected_addresses {
        problems.push(Problem::warning(format!(
            "email address {address:?} is malformed and will be ignored"
        )));
    }

    let groups = match host.groups() {
        Ok(groups) => GroupMap::new(groups),
        Err(err) => {
            problems.push(Problem::error(err.to_string()));
            return problems;
        }
    };
    if groups.is_empty() && !settings.auto_create_group {
        problems.push(Problem::warning(
            "project has no groups and create-dag-flag is off; no record will be assigned",
        ));
    }

    for id in groups.duplicate_ids() {
        problems.push(Problem::error(format!("group id {id} is reported more than once")));
    }

    match settings.match_group_by {
        MatchGroupBy::Name => {
            let mut seen = BTreeSet::new();
            for g in groups.iter() {
                if !seen.insert(g.name.as_str()) {
                    problems.push(Problem::warning(format!(
                        "group name {:?} is used more than once; the first in host order wins",
                        g.name
                    )));
                }
            }
        }
        MatchGroupBy::Suffix => {
            for (suffix, ids) in groups.duplicate_suffixes(&settings.label_separator) {
                let ids: Vec<String> = ids.iter().map(GroupId::to_string).collect();
                let message = format!("suffix {:?} is shared by groups {}", suffix, ids.join(", "));
                problems.push(match settings.duplicate_suffix {
                    DuplicateSuffixPolicy::Reject => Problem::error(message),
                    DuplicateSuffixPolicy::FirstMatch => {
                        Problem::warning(format!("{message}; resolution depends on host order"))
                    }
                });
            }
        }
        MatchGroupBy::Id => {}
    }

    problems.sort_by(|a, b| b.severity.cmp(&a.severity));
    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{DAG_ASSIGN_TYPE, DAG_FIELD, DUPLICATE_SUFFIX_POLICY, EMAIL_NOTIFICATION};
    use pretty_assertions::assert_eq;

    #[test]
    fn check_without_dag_field_is_an_error() {
        let host = FixtureHost::new(1);
        assert_eq!(
            check(&host, &[]),
            vec![Problem::error("dag-field is not set; no record will be assigned")]
        );
    }

    #[test]
    fn check_flags_duplicate_suffixes_per_policy() {
        let host = FixtureHost::new(1)
            .with_setting(DAG_FIELD, "site")
            .with_setting(DAG_ASSIGN_TYPE, "2")
            .with_instrument("enrollment", ["record_id", "site"])
            .with_group(1, "North - 4")
            .with_group(2, "South - 4");

        let problems = check(&host, &["enrollment"]);
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].severity, Severity::Warning);

        let host = host.with_setting(DUPLICATE_SUFFIX_POLICY, "reject");
        assert_eq!(
            check(&host, &["enrollment"]),
            vec![Problem::error("suffix \"4\" is shared by groups 1, 2")]
        );
    }

    #[test]
    fn check_warns_when_field_is_on_no_instrument() {
        let host = FixtureHost::new(1)
            .with_setting(DAG_FIELD, "site")
            .with_instrument("enrollment", ["record_id"])
            .with_group(1, "Site A");
        assert_eq!(
            check(&host, &["enrollment"]),
            vec![Problem::warning("dag-field site is not on any instrument")]
        );
    }

    #[test]
    fn check_warns_about_malformed_recipients() {
        let host = FixtureHost::new(1)
            .with_setting(DAG_FIELD, "site")
            .with_setting(EMAIL_NOTIFICATION, "dm@example.org;nobody")
            .with_instrument("enrollment", ["record_id", "site"])
            .with_group(1, "Site A");
        assert_eq!(
            check(&host, &["enrollment"]),
            vec![Problem::warning("email address \"nobody\" is malformed and will be ignored")]
        );
    }

    #[test]
    fn replay_reports_outcomes_in_event_order() {
        let spec: FixtureSpec = serde_json::from_str(
            r#"{
                "settings": { "dag-field": "site", "dag-assign-type": "1" },
                "instruments": { "enrollment": ["record_id", "site"] },
                "choices": { "site": { "1": "Site A", "2": "Site B" } },
                "groups": [ { "id": 7, "name": "Site A" }, { "id": 8, "name": "Site B" } ],
                "records": [ { "id": "101", "data": { "site": "1" } } ],
                "events": [
                    { "record": "101", "instrument": "enrollment" },
                    { "record": "101", "instrument": "enrollment", "set": { "site": "2" } },
                    { "record": "101", "instrument": "enrollment" }
                ]
            }"#,
        )
        .unwrap();
        let fixture = spec.validate_and_build().unwrap();
        let report = replay(&fixture);

        let outcomes: Vec<Outcome> = report.events.into_iter().map(|e| e.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                Outcome::Assigned { from: None, to: GroupId(7) },
                Outcome::Assigned { from: Some(GroupId(7)), to: GroupId(8) },
                Outcome::Unchanged { group: GroupId(8) },
            ]
        );
        assert_eq!(report.record_groups.get("101"), Some(&Some(GroupId(8))));
    }
}
