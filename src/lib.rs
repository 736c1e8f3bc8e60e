//! Data Access Group assignment driven by a record field.
//!
//! A host platform calls [`AssignmentEngine::on_record_saved`] on every record
//! save. The engine reads the project's settings, looks up the trigger field's
//! value, resolves it to a group and moves the record there when needed.

pub mod engine;
pub mod error;
pub mod fixture;
pub mod groups;
pub mod host;
pub mod resolver;
pub mod settings;

pub use engine::{Applied, AssignmentEngine, Evaluation, Outcome, SkipReason};
pub use error::{AssignError, HostError};
pub use groups::{Group, GroupCache, GroupId, GroupMap};
pub use host::{Host, Notification, RecordSnapshot, SaveEvent};
pub use resolver::GroupResolver;
pub use settings::{DuplicateSuffixPolicy, MatchGroupBy, Settings, Trigger};
