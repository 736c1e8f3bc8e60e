//! Project settings that drive the assignment rule.
//!
//! Settings are read from the host on every evaluation; nothing is kept
//! between save events. Keys and defaults:
//!
//! | key                       | default             |
//! |---------------------------|---------------------|
//! | `dag-field`               | (required)          |
//! | `curr-instr-only`         | `0`                 |
//! | `value-label-flag`        | `1` (match label)   |
//! | `dag-assign-type`         | `1` (group name)    |
//! | `create-dag-flag`         | `0` (never create)  |
//! | `email-notification`      | (none)              |
//! | `email-sender`            | `autodag@localhost` |
//! | `label-value-separator`   | `" - "`             |
//! | `duplicate-suffix-policy` | `first-match`       |

use crate::error::{AssignError, HostError, Result};
use crate::host::Host;
use crate::resolver::GroupResolver;
use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

pub const DAG_FIELD: &str = "dag-field";
pub const CURRENT_INSTRUMENT_ONLY: &str = "curr-instr-only";
pub const VALUE_LABEL_FLAG: &str = "value-label-flag";
pub const DAG_ASSIGN_TYPE: &str = "dag-assign-type";
pub const CREATE_DAG_FLAG: &str = "create-dag-flag";
pub const EMAIL_NOTIFICATION: &str = "email-notification";
pub const EMAIL_SENDER: &str = "email-sender";
pub const LABEL_VALUE_SEPARATOR: &str = "label-value-separator";
pub const DUPLICATE_SUFFIX_POLICY: &str = "duplicate-suffix-policy";

pub const DEFAULT_SENDER: &str = "autodag@localhost";
pub const DEFAULT_SEPARATOR: &str = " - ";

static RECIPIENT_SPLIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[,;\s]+").expect("recipient separator pattern")
});

static ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+$").expect("address pattern")
});

/// How the match key is compared against the project's groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchGroupBy {
    /// Key is a group id (`dag-assign-type = 0`).
    Id,
    /// Key equals a group name (`dag-assign-type = 1`).
    Name,
    /// Key equals the text after the last separator in a group name (`dag-assign-type = 2`).
    Suffix,
}

/// Tie-break when several group names end in the same suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateSuffixPolicy {
    /// First group in host order wins. Host order is not guaranteed stable.
    FirstMatch,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub dag_field: String,
    pub restrict_to_instrument: bool,
    pub match_by_label: bool,
    pub match_group_by: MatchGroupBy,
    pub auto_create_group: bool,
    pub notify_to: Vec<String>,
    pub notify_from: String,
    /// Addresses from `email-notification` / `email-sender` that were dropped as malformed.
    pub rejected_addresses: Vec<String>,
    pub label_separator: String,
    pub duplicate_suffix: DuplicateSuffixPolicy,
}

/// The two settings that decide whether a save is evaluated at all.
///
/// Parsed on its own so a bad unrelated setting cannot turn a skipped save
/// into a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub dag_field: String,
    pub restrict_to_instrument: bool,
}

impl Trigger {
    pub fn load<H: Host + ?Sized>(host: &H) -> Result<Self> {
        Self::parse(|key| host.project_setting(key))
    }

    /// Fails with `MissingConfiguration` when no trigger field is set.
    pub fn parse<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> std::result::Result<Option<String>, HostError>,
    {
        let dag_field = get(DAG_FIELD)?
            .map(|f| f.trim().to_string())
            .unwrap_or_default();
        if dag_field.is_empty() {
            return Err(AssignError::MissingConfiguration);
        }

        Ok(Self {
            dag_field,
            restrict_to_instrument: parse_flag(CURRENT_INSTRUMENT_ONLY, get(CURRENT_INSTRUMENT_ONLY)?, false)?,
        })
    }
}

impl Settings {
    /// Read settings from the host's project settings.
    pub fn load<H: Host + ?Sized>(host: &H) -> Result<Self> {
        Self::parse(|key| host.project_setting(key))
    }

    /// Build settings from a key lookup. Fails with `MissingConfiguration`
    /// when no trigger field is set.
    ///
    /// Malformed addresses never fail the load: notifications are
    /// best-effort, so bad recipients are dropped and listed in
    /// `rejected_addresses`.
    pub fn parse<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> std::result::Result<Option<String>, HostError>,
    {
        let Trigger {
            dag_field,
            restrict_to_instrument,
        } = Trigger::parse(&get)?;

        let match_group_by = match get(DAG_ASSIGN_TYPE)?.as_deref().map(str::trim) {
            None | Some("") | Some("1") => MatchGroupBy::Name,
            Some("0") => MatchGroupBy::Id,
            Some("2") => MatchGroupBy::Suffix,
            Some(other) => {
                return Err(invalid(DAG_ASSIGN_TYPE, other, "expected 0 (id), 1 (name) or 2 (suffix)"));
            }
        };

        let duplicate_suffix = match get(DUPLICATE_SUFFIX_POLICY)?.as_deref().map(str::trim) {
            None | Some("") | Some("first-match") => DuplicateSuffixPolicy::FirstMatch,
            Some("reject") => DuplicateSuffixPolicy::Reject,
            Some(other) => {
                return Err(invalid(DUPLICATE_SUFFIX_POLICY, other, "expected first-match or reject"));
            }
        };

        let label_separator = match get(LABEL_VALUE_SEPARATOR)? {
            None => DEFAULT_SEPARATOR.to_string(),
            Some(sep) if sep.is_empty() => {
                return Err(invalid(LABEL_VALUE_SEPARATOR, &sep, "separator must not be empty"));
            }
            Some(sep) => sep,
        };

        let mut rejected_addresses = Vec::new();

        let notify_from = match get(EMAIL_SENDER)?.map(|s| s.trim().to_string()) {
            None => DEFAULT_SENDER.to_string(),
            Some(s) if s.is_empty() => DEFAULT_SENDER.to_string(),
            Some(s) if ADDRESS.is_match(&s) => s,
            Some(s) => {
                warn!(key = EMAIL_SENDER, address = %s, "ignoring malformed sender address");
                rejected_addresses.push(s);
                DEFAULT_SENDER.to_string()
            }
        };

        let raw_recipients = get(EMAIL_NOTIFICATION)?.unwrap_or_default();
        let (notify_to, bad) = split_recipients(&raw_recipients);
        for address in &bad {
            warn!(key = EMAIL_NOTIFICATION, address = %address, "ignoring malformed recipient");
        }
        rejected_addresses.extend(bad);

        Ok(Self {
            dag_field,
            restrict_to_instrument,
            match_by_label: parse_flag(VALUE_LABEL_FLAG, get(VALUE_LABEL_FLAG)?, true)?,
            match_group_by,
            auto_create_group: parse_flag(CREATE_DAG_FLAG, get(CREATE_DAG_FLAG)?, false)?,
            notify_to,
            notify_from,
            rejected_addresses,
            label_separator,
            duplicate_suffix,
        })
    }

    pub fn resolver(&self) -> GroupResolver {
        if self.auto_create_group {
            GroupResolver::CreateIfMissing
        } else {
            GroupResolver::ExistingOnly
        }
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> AssignError {
    AssignError::InvalidSetting {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Checkbox-style flag: `1/0`, `true/false`, `yes/no`, `on/off`. Blank means default.
fn parse_flag(key: &'static str, raw: Option<String>, default: bool) -> Result<bool> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(default),
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, &raw, "expected a boolean flag")),
    }
}

/// Split a recipient list on commas, semicolons or whitespace into
/// (valid, malformed) addresses.
fn split_recipients(raw: &str) -> (Vec<String>, Vec<String>) {
    let mut valid = Vec::new();
    let mut malformed = Vec::new();
    for part in RECIPIENT_SPLIT.split(raw.trim()) {
        if part.is_empty() {
            continue;
        }
        if ADDRESS.is_match(part) {
            valid.push(part.to_string());
        } else {
            malformed.push(part.to_string());
        }
    }
    (valid, malformed)
}
