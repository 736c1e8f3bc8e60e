//! Group assignment engine.
//!
//! Flow for one save event:
//! 1) load the trigger settings, skip when unconfigured or the field is not on the saved instrument
//! 2) fetch the trigger field value fresh from the host
//! 3) blank value (absent, empty or "0") => notify, leave the group alone
//! 4) resolve the match key (choice label or raw value) to a group
//! 5) set the group if it differs, then recalculate dependent fields
//!
//! Errors travel up as `AssignError` and stop at `on_record_saved`.

use crate::error::{AssignError, Result};
use crate::groups::{Group, GroupCache, GroupId};
use crate::host::{Host, Notification, SaveEvent};
use crate::settings::{DuplicateSuffixPolicy, MatchGroupBy, Settings, Trigger};
use serde::Serialize;
use tracing::{debug, info, info_span, warn};

/// State scoped to one save-event evaluation.
#[derive(Debug)]
pub struct Evaluation {
    pub settings: Settings,
    pub groups: GroupCache,
}

impl Evaluation {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            groups: GroupCache::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    NotConfigured,
    FieldNotOnInstrument,
}

/// What happened to a record. The host ignores it; the CLI and tests read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum Outcome {
    Skipped { reason: SkipReason },
    EmptyValue,
    Unchanged { group: GroupId },
    Assigned { from: Option<GroupId>, to: GroupId },
    Failed { kind: String, message: String },
}

/// Successful resolution by `apply_group_assignment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub group: GroupId,
    pub changed: bool,
}

pub struct AssignmentEngine<'h, H: Host + ?Sized> {
    host: &'h H,
}

impl<'h, H: Host + ?Sized> AssignmentEngine<'h, H> {
    pub fn new(host: &'h H) -> Self {
        Self { host }
    }

    /// Save-event handler. Never fails: every error is logged here and the
    /// host's save goes ahead regardless.
    pub fn on_record_saved(&self, event: &SaveEvent) -> Outcome {
        let span = info_span!(
            "record_saved",
            project = event.project_id,
            record = %event.record,
            instrument = %event.instrument,
            event_id = event.event_id,
        );
        let _guard = span.enter();

        match self.evaluate(event) {
            Ok(outcome) => outcome,
            Err(AssignError::MissingConfiguration) => {
                debug!("no DAG field configured");
                Outcome::Skipped {
                    reason: SkipReason::NotConfigured,
                }
            }
            Err(err) => {
                warn!(kind = err.kind(), error = %err, "DAG assignment aborted");
                self.host.log_message(&format!(
                    "Error assigning DAG for record {}: {}",
                    event.record, err
                ));
                Outcome::Failed {
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                }
            }
        }
    }

    fn evaluate(&self, event: &SaveEvent) -> Result<Outcome> {
        let trigger = Trigger::load(self.host)?;

        if trigger.restrict_to_instrument {
            let fields = self.host.field_names(&event.instrument)?;
            if !fields.iter().any(|f| *f == trigger.dag_field) {
                debug!(field = %trigger.dag_field, "DAG field not on saved instrument");
                return Ok(Outcome::Skipped {
                    reason: SkipReason::FieldNotOnInstrument,
                });
            }
        }

        let dag_field = trigger.dag_field;
        let mut eval = Evaluation::new(Settings::load(self.host)?);
        self.assign_group_from_field(
            &mut eval,
            event.project_id,
            &event.record,
            event.group_id.as_deref(),
            &dag_field,
        )
    }

    /// Assign `record` to the group named by its `dag_field` value.
    pub fn assign_group_from_field(
        &self,
        eval: &mut Evaluation,
        project_id: u64,
        record: &str,
        current_group: Option<&str>,
        dag_field: &str,
    ) -> Result<Outcome> {
        let current = normalize_group_id(current_group);

        let id_field = self.host.record_id_field()?;
        let snapshot = self
            .host
            .record_data(project_id, record, &[id_field.as_str(), dag_field])?
            .ok_or_else(|| AssignError::DataRetrieval {
                record: record.to_string(),
            })?;

        let value = snapshot.get(dag_field).map(String::as_str).unwrap_or("");
        if is_blank(value) {
            info!(field = dag_field, "DAG field empty, group left unchanged");
            self.host.log_message(&format!(
                "DAG field {dag_field} is empty for record {record}; DAG not changed."
            ));
            let body = format!(
                "Record {record} in project {project_id} was saved with an empty {dag_field} field.\n\
                 Its DAG was left unchanged (current group: {}).\n\nRecord data: {}",
                describe_group(current),
                serde_json::to_string(&snapshot).unwrap_or_default(),
            );
            self.notify(eval, format!("Empty DAG field for record {record}"), body);
            return Ok(Outcome::EmptyValue);
        }

        let key = self.match_key(eval, dag_field, value)?;
        debug!(value, key = %key, "resolved match key");

        if !self.verify_group_exists(eval, &key)? {
            let resolver = eval.settings.resolver();
            let created = resolver.resolve_missing(self.host, eval, &key)?;
            debug!(group = %created, "continuing with created group");
        }

        match self.apply_group_assignment(eval, record, current, &key) {
            Ok(Applied { group, changed: true }) => Ok(Outcome::Assigned {
                from: current,
                to: group,
            }),
            Ok(Applied { group, changed: false }) => Ok(Outcome::Unchanged { group }),
            Err(err) => {
                let body = format!(
                    "The DAG for record {record} in project {project_id} could not be set \
                     and needs manual attention.\n\n\
                     Current group: {}\nField {dag_field}: {value}\nMatch key: {key}\nError: {err}",
                    describe_group(current),
                );
                self.notify(eval, format!("DAG alert for record {record}"), body);
                Err(err)
            }
        }
    }

    /// True when some group answers to `key` under the configured matching mode.
    /// An empty group list is never a match.
    pub fn verify_group_exists(&self, eval: &mut Evaluation, key: &str) -> Result<bool> {
        if eval.groups.get(self.host)?.is_empty() {
            debug!("project has no groups");
            return Ok(false);
        }
        Ok(self.find_target(eval, key)?.is_some())
    }

    /// Move `record` into the group `key` resolves to, then recalculate.
    ///
    /// The group is only written when it differs from `current`, so an
    /// unchanged re-save never triggers the host's group-change side effects.
    /// Recalculation runs either way.
    pub fn apply_group_assignment(
        &self,
        eval: &mut Evaluation,
        record: &str,
        current: Option<GroupId>,
        key: &str,
    ) -> Result<Applied> {
        let Some(target) = self.find_target(eval, key)? else {
            let reason = match eval.settings.match_group_by {
                MatchGroupBy::Name => format!("DAG name '{key}' not found in existing groups."),
                MatchGroupBy::Id => format!("DAG ID '{key}' is not valid."),
                MatchGroupBy::Suffix => format!(
                    "No DAG name ends with '{}{key}'.",
                    eval.settings.label_separator
                ),
            };
            warn!(key, "{reason}");
            self.host.log_message(&reason);
            return Err(AssignError::AssignmentFailure {
                record: record.to_string(),
                current,
                key: key.to_string(),
                reason,
            });
        };

        let changed = current != Some(target);
        if changed {
            self.host.set_record_group(record, target)?;
            info!(from = %describe_group(current), to = %target, "DAG assigned");
        } else {
            debug!(group = %target, "record already in target DAG");
        }
        self.host.log_message(&format!(
            "DAG successfully assigned for record {record}. Assigned Group ID: {target}"
        ));

        self.host.log_message(&format!(
            "Attempting to update calculated fields for record {record}."
        ));
        self.host.recalculate_fields(&[record.to_string()])?;
        self.host
            .log_message(&format!("Calculations updated for record {record}."));

        Ok(Applied {
            group: target,
            changed,
        })
    }

    /// Find the group whose name ends in `separator + value`.
    ///
    /// With several candidates the first in host order wins, unless the
    /// duplicate-suffix policy is `reject`.
    pub fn lookup_group_for_field_value(
        &self,
        eval: &mut Evaluation,
        value: &str,
    ) -> Result<Option<Group>> {
        let separator = &eval.settings.label_separator;
        let groups = eval.groups.get(self.host)?;

        let mut matches = groups.suffix_matches(value, separator);
        let Some(first) = matches.next() else {
            return Ok(None);
        };

        if eval.settings.duplicate_suffix == DuplicateSuffixPolicy::Reject {
            let others: Vec<String> = matches.map(|g| g.id.to_string()).collect();
            if !others.is_empty() {
                return Err(AssignError::resolution(
                    value,
                    format!(
                        "suffix shared by groups {}, {}",
                        first.id,
                        others.join(", ")
                    ),
                ));
            }
        }

        Ok(Some(first.clone()))
    }

    fn find_target(&self, eval: &mut Evaluation, key: &str) -> Result<Option<GroupId>> {
        match eval.settings.match_group_by {
            MatchGroupBy::Name => Ok(eval.groups.get(self.host)?.id_by_name(key)),
            MatchGroupBy::Id => {
                let groups = eval.groups.get(self.host)?;
                Ok(GroupId::parse(key).filter(|id| groups.contains_id(*id)))
            }
            MatchGroupBy::Suffix => Ok(self.lookup_group_for_field_value(eval, key)?.map(|g| g.id)),
        }
    }

    fn match_key(&self, eval: &Evaluation, dag_field: &str, value: &str) -> Result<String> {
        if !eval.settings.match_by_label {
            return Ok(value.to_string());
        }
        self.host
            .choice_label(dag_field, value)?
            .ok_or_else(|| {
                AssignError::resolution(value, format!("no choice label for {dag_field} = {value:?}"))
            })
    }

    /// Fire-and-forget: delivery problems are logged, never returned.
    fn notify(&self, eval: &Evaluation, subject: String, body: String) {
        if eval.settings.notify_to.is_empty() {
            warn!(subject = %subject, "no notification address configured");
            return;
        }
        let notification = Notification {
            to: eval.settings.notify_to.clone(),
            from: eval.settings.notify_from.clone(),
            subject,
            body,
        };
        if let Err(err) = self.host.send_notification(&notification) {
            warn!(error = %err, "notification not sent");
            self.host
                .log_message(&format!("Failed to send DAG notification: {err}"));
        }
    }
}

/// Host group ids arrive as text; anything that is not a number means no group.
pub fn normalize_group_id(raw: Option<&str>) -> Option<GroupId> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<u64>() {
        Ok(id) => Some(GroupId(id)),
        Err(_) => {
            warn!(group = raw, "ignoring non-numeric current group id");
            None
        }
    }
}

/// Values that count as "no value": absent, `""` and `"0"`.
pub fn is_blank(value: &str) -> bool {
    value.is_empty() || value == "0"
}

fn describe_group(group: Option<GroupId>) -> String {
    group.map_or_else(|| "none".to_string(), |g| g.to_string())
}
