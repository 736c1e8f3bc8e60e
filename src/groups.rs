//! Data Access Groups as the host reports them.
//!
//! Host iteration order is kept as-is: the suffix lookup is first-match and
//! its result depends on that order.

use crate::error::HostError;
use crate::host::Host;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Host-allocated group identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u64);

impl GroupId {
    /// Parse a canonical decimal id ("7", not " 7", "+7" or "07").
    pub fn parse(s: &str) -> Option<Self> {
        let id = s.parse::<u64>().ok()?;
        (id.to_string() == s).then_some(Self(id))
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
}

impl Group {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id: GroupId(id),
            name: name.into(),
        }
    }
}

/// Text after the last `separator` in `name`, or None when the name has no separator.
pub fn name_suffix<'a>(name: &'a str, separator: &str) -> Option<&'a str> {
    if separator.is_empty() {
        return None;
    }
    name.rfind(separator).map(|i| &name[i + separator.len()..])
}

/// Group id -> name mapping in host order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupMap {
    groups: Vec<Group>,
}

impl GroupMap {
    pub fn new(groups: Vec<Group>) -> Self {
        Self { groups }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Group> {
        self.groups.iter()
    }

    pub fn contains_id(&self, id: GroupId) -> bool {
        self.groups.iter().any(|g| g.id == id)
    }

    pub fn name_of(&self, id: GroupId) -> Option<&str> {
        self.groups
            .iter()
            .find(|g| g.id == id)
            .map(|g| g.name.as_str())
    }

    /// Exact, case-sensitive name match. First group in host order wins.
    pub fn id_by_name(&self, name: &str) -> Option<GroupId> {
        self.groups.iter().find(|g| g.name == name).map(|g| g.id)
    }

    /// Groups whose name suffix equals `value`, in host order.
    pub fn suffix_matches<'a>(&'a self, value: &'a str, separator: &'a str) -> impl Iterator<Item = &'a Group> {
        self.groups
            .iter()
            .filter(move |g| name_suffix(&g.name, separator) == Some(value))
    }

    /// Add a group, replacing any previous entry with the same id.
    pub fn insert(&mut self, group: Group) {
        match self.groups.iter_mut().find(|g| g.id == group.id) {
            Some(slot) => *slot = group,
            None => self.groups.push(group),
        }
    }

    /// Ids reported more than once by the host.
    pub fn duplicate_ids(&self) -> Vec<GroupId> {
        let mut seen: BTreeMap<GroupId, usize> = BTreeMap::new();
        for g in &self.groups {
            *seen.entry(g.id).or_default() += 1;
        }
        seen.into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(id, _)| id)
            .collect()
    }

    /// Suffixes shared by more than one group, with the ids that share them.
    pub fn duplicate_suffixes(&self, separator: &str) -> BTreeMap<String, Vec<GroupId>> {
        let mut by_suffix: BTreeMap<String, Vec<GroupId>> = BTreeMap::new();
        for g in &self.groups {
            if let Some(suffix) = name_suffix(&g.name, separator) {
                by_suffix.entry(suffix.to_string()).or_default().push(g.id);
            }
        }
        by_suffix.retain(|_, ids| ids.len() > 1);
        by_suffix
    }
}

/// Group mapping fetched lazily once per evaluation.
///
/// Owned by one `Evaluation` and dropped with it, so a later save event
/// always sees the host's current groups.
#[derive(Debug, Default)]
pub struct GroupCache {
    groups: Option<GroupMap>,
}

impl GroupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.groups.is_some()
    }

    pub fn get<H: Host + ?Sized>(&mut self, host: &H) -> Result<&GroupMap, HostError> {
        let groups = match self.groups.take() {
            Some(groups) => groups,
            None => GroupMap::new(host.groups()?),
        };
        Ok(self.groups.insert(groups))
    }

    /// Record a group created during this evaluation. An unloaded cache is
    /// left alone; the next fetch will include the group.
    pub fn remember(&mut self, group: Group) {
        if let Some(groups) = self.groups.as_mut() {
            groups.insert(group);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sites() -> GroupMap {
        GroupMap::new(vec![
            Group::new(7, "Site A - 1"),
            Group::new(8, "Site B - 2"),
            Group::new(9, "North - East - 2"),
            Group::new(10, "Unsuffixed"),
        ])
    }

    #[test]
    fn parse_accepts_only_canonical_ids() {
        assert_eq!(GroupId::parse("7"), Some(GroupId(7)));
        assert_eq!(GroupId::parse("07"), None);
        assert_eq!(GroupId::parse("+7"), None);
        assert_eq!(GroupId::parse(" 7"), None);
        assert_eq!(GroupId::parse("Site A"), None);
    }

    #[test]
    fn suffix_is_taken_after_last_separator() {
        assert_eq!(name_suffix("North - East - 2", " - "), Some("2"));
        assert_eq!(name_suffix("Site A - ", " - "), Some(""));
        assert_eq!(name_suffix("Unsuffixed", " - "), None);
        assert_eq!(name_suffix("anything", ""), None);
    }

    #[test]
    fn suffix_matches_keep_host_order() {
        let map = sites();
        let ids: Vec<GroupId> = map.suffix_matches("2", " - ").map(|g| g.id).collect();
        assert_eq!(ids, vec![GroupId(8), GroupId(9)]);
    }

    #[test]
    fn duplicate_suffixes_are_reported() {
        let dups = sites().duplicate_suffixes(" - ");
        assert_eq!(
            dups.into_iter().collect::<Vec<_>>(),
            vec![("2".to_string(), vec![GroupId(8), GroupId(9)])]
        );
    }

    #[test]
    fn name_lookup_is_exact() {
        let map = sites();
        assert_eq!(map.id_by_name("Site A - 1"), Some(GroupId(7)));
        assert_eq!(map.id_by_name("site a - 1"), None);
        assert_eq!(map.name_of(GroupId(10)), Some("Unsuffixed"));
    }

    #[test]
    fn insert_replaces_same_id() {
        let mut map = sites();
        map.insert(Group::new(10, "Renamed"));
        map.insert(Group::new(11, "New"));
        assert_eq!(map.len(), 5);
        assert_eq!(map.name_of(GroupId(10)), Some("Renamed"));
        assert!(map.duplicate_ids().is_empty());
    }
}
