//! What to do when the match key names no existing group.

use crate::engine::Evaluation;
use crate::error::{AssignError, Result};
use crate::groups::{Group, GroupId};
use crate::host::Host;
use crate::settings::MatchGroupBy;
use tracing::info;

/// Selected by the `create-dag-flag` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupResolver {
    /// Leave the record alone.
    ExistingOnly,
    /// Create a group named after the match key, then assign it.
    CreateIfMissing,
}

impl GroupResolver {
    /// Produce a group for `key` after verification found none.
    ///
    /// Only name matching can create: ids are allocated by the host and a
    /// suffix does not determine a full group name.
    pub fn resolve_missing<H: Host + ?Sized>(
        &self,
        host: &H,
        eval: &mut Evaluation,
        key: &str,
    ) -> Result<GroupId> {
        match (self, eval.settings.match_group_by) {
            (Self::ExistingOnly, _) => Err(AssignError::resolution(key, "no matching group")),
            (Self::CreateIfMissing, MatchGroupBy::Name) => {
                let id = host.create_group(key)?;
                info!(group = %id, name = key, "created missing group");
                host.log_message(&format!("Created DAG '{key}' with group ID {id}."));
                eval.groups.remember(Group {
                    id,
                    name: key.to_string(),
                });
                Ok(id)
            }
            (Self::CreateIfMissing, MatchGroupBy::Id) => Err(AssignError::resolution(
                key,
                "no group with this id and ids cannot be created",
            )),
            (Self::CreateIfMissing, MatchGroupBy::Suffix) => Err(AssignError::resolution(
                key,
                "no group with this suffix and a suffix is not a group name",
            )),
        }
    }
}
