//! Audit log entry types
//!
//! A `LogEntry` is the immutable record persisted in partition files.
//! Producers hand the engine an `AuditRecord`; the engine stamps the id and
//! timestamp when the record is enqueued.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Outcome of the audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    /// The action completed
    #[default]
    Success,
    /// The action was attempted and failed
    Failure,
    /// The action completed with something worth a second look
    Warning,
    /// Informational record, not tied to an outcome
    Info,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Success => "SUCCESS",
            EntryStatus::Failure => "FAILURE",
            EntryStatus::Warning => "WARNING",
            EntryStatus::Info => "INFO",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SUCCESS" => Some(EntryStatus::Success),
            "FAILURE" => Some(EntryStatus::Failure),
            "WARNING" => Some(EntryStatus::Warning),
            "INFO" => Some(EntryStatus::Info),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Keys of the `user` object owned by the typed `Actor` fields
const RESERVED_ACTOR_FIELDS: [&str; 3] = ["id", "email", "role"];

/// The user (or system principal) that performed the action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub email: String,
    pub role: String,
    /// Any additional user fields supplied by the caller (name, department, ...)
    ///
    /// Must not contain `id`, `email` or `role`; those would be written twice.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Actor {
    pub fn new(id: impl Into<String>, email: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            role: role.into(),
            extra: Map::new(),
        }
    }

    /// Attach an extra field that is stored alongside id/email/role
    ///
    /// A string under `id`, `email` or `role` sets that typed field; any other
    /// value under those keys is dropped.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();

        if !RESERVED_ACTOR_FIELDS.contains(&key.as_str()) {
            self.extra.insert(key, value);
            return self;
        }
        if let Value::String(s) = value {
            match key.as_str() {
                "id" => self.id = s,
                "email" => self.email = s,
                _ => self.role = s,
            }
        }
        self
    }

    /// Remove reserved keys that were put into `extra` directly
    fn without_reserved_fields(mut self) -> Self {
        self.extra
            .retain(|key, _| !RESERVED_ACTOR_FIELDS.contains(&key.as_str()));
        self
    }
}

/// What was done, and to which module/entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditAction {
    /// Action type, e.g. `CREATE`, `UPDATE`, `DELETE`, `LOGIN`
    #[serde(rename = "type")]
    pub action_type: String,
    /// Business module, e.g. `CHEMICALS`, `EQUIPMENT`, `ORDERS`
    pub module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

impl AuditAction {
    pub fn new(action_type: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            module: module.into(),
            entity_id: None,
        }
    }

    pub fn on_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }
}

/// A persisted audit log entry
///
/// Entries are immutable once written. The on-disk JSON shape is
/// `{id, timestamp, user, action, details?, context, status}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user: Actor,
    pub action: AuditAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub status: EntryStatus,
}

impl LogEntry {
    /// Stamp a record with a fresh id and the given write time
    pub fn from_record(record: AuditRecord, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            user: record.actor.without_reserved_fields(),
            action: record.action,
            details: record.details,
            context: record.context,
            status: record.status,
        }
    }

    /// Calendar date (UTC) that decides the entry's partition
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Producer-side input: everything except the engine-assigned id and timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub action: AuditAction,
    pub actor: Actor,
    pub context: Map<String, Value>,
    pub details: Option<Value>,
    pub status: EntryStatus,
}

impl AuditRecord {
    pub fn new(action: AuditAction, actor: Actor) -> Self {
        Self {
            action,
            actor,
            context: Map::new(),
            details: None,
            status: EntryStatus::Success,
        }
    }

    pub fn context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status(mut self, status: EntryStatus) -> Self {
        self.status = status;
        self
    }
}
