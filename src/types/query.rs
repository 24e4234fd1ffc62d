//! Query filter types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::entry::EntryStatus;

/// Inclusive time window. Missing bounds are open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    /// Unbounded range
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn since(from: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: None,
        }
    }

    pub fn until(to: DateTime<Utc>) -> Self {
        Self {
            from: None,
            to: Some(to),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| *ts >= from) && self.to.map_or(true, |to| *ts <= to)
    }

    /// Whether any instant of the given UTC day can fall inside the range
    pub fn overlaps_day(&self, day: NaiveDate) -> bool {
        self.from.map_or(true, |from| day >= from.date_naive())
            && self.to.map_or(true, |to| day <= to.date_naive())
    }
}

/// Filters accepted by `AuditLog::query`
///
/// All supplied filters must match. `search` is a case-insensitive substring
/// test against the entry's serialized JSON. Results are sorted newest first
/// before `offset`/`limit` are applied; a `None` limit returns every match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EntryStatus>,
    #[serde(default)]
    pub range: DateRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn action(mut self, action_type: impl Into<String>) -> Self {
        self.action_type = Some(action_type.into());
        self
    }

    pub fn entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn status(mut self, status: EntryStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn range(mut self, range: DateRange) -> Self {
        self.range = range;
        self
    }

    pub fn search(mut self, needle: impl Into<String>) -> Self {
        self.search = Some(needle.into());
        self
    }

    pub fn paginate(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_range_contains_is_inclusive() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let range = DateRange::between(from, to);

        assert!(range.contains(&from));
        assert!(range.contains(&to));
        assert!(!range.contains(&(to + chrono::Duration::seconds(1))));
        assert!(DateRange::all().contains(&from));
    }

    #[test]
    fn test_overlaps_day() {
        let range = DateRange::since(Utc.with_ymd_and_hms(2024, 3, 10, 18, 0, 0).unwrap());

        assert!(range.overlaps_day(NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()));
        assert!(range.overlaps_day(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()));
        assert!(!range.overlaps_day(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()));
    }

    #[test]
    fn test_query_deserializes_camel_case() {
        let query: AuditQuery = serde_json::from_str(
            r#"{"module":"CHEMICALS","actionType":"CREATE","status":"FAILURE","limit":10}"#,
        )
        .unwrap();

        assert_eq!(query.module.as_deref(), Some("CHEMICALS"));
        assert_eq!(query.action_type.as_deref(), Some("CREATE"));
        assert_eq!(query.status, Some(EntryStatus::Failure));
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.offset, 0);
    }
}
