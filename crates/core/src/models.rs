//! Synchronized record types and the table registry.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Canonical list of local collections that participate in device sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTable {
    Activities,
    Habits,
    Completions,
    CycleData,
    Reflections,
}

impl SyncTable {
    pub const ALL: [SyncTable; 5] = [
        SyncTable::Activities,
        SyncTable::Habits,
        SyncTable::Completions,
        SyncTable::CycleData,
        SyncTable::Reflections,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTable::Activities => "activities",
            SyncTable::Habits => "habits",
            SyncTable::Completions => "completions",
            SyncTable::CycleData => "cycle_data",
            SyncTable::Reflections => "reflections",
        }
    }

    /// Local-cache key the table's collection is stored under.
    pub fn collection_key(&self) -> &'static str {
        match self {
            SyncTable::Activities => "ritmo.records.activities",
            SyncTable::Habits => "ritmo.records.habits",
            SyncTable::Completions => "ritmo.records.completions",
            SyncTable::CycleData => "ritmo.records.cycle_data",
            SyncTable::Reflections => "ritmo.records.reflections",
        }
    }
}

impl std::fmt::Display for SyncTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sync metadata carried by every record.
///
/// `updated_at` reflects the most recent accepted mutation; rows written by
/// older installations may omit it, in which case `created_at` stands in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMeta {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Device that produced the last accepted write. Tiebreaker only,
    /// never an authorization signal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl RecordMeta {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: None,
            created_at: now,
            updated_at: Some(now),
            device_id: None,
        }
    }

    /// Timestamp used for freshness comparisons.
    pub fn effective_timestamp(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}

/// A tracked activity entry (e.g. "ran 5 km" on a given day).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub amount: f64,
    pub unit: String,
    pub date: NaiveDate,
}

/// A recurring habit definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitRecord {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub target_per_week: i32,
    #[serde(default)]
    pub archived: bool,
}

/// A single habit check-off for a day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRecord {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub habit_id: String,
    pub date: NaiveDate,
}

/// Menstrual-cycle tracking snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSnapshotRecord {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub last_period_start: NaiveDate,
    pub cycle_length_days: i32,
    pub period_length_days: i32,
}

/// A dated free-form reflection, optionally with a mood rating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectionRecord {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<i32>,
    pub body: String,
}

/// Any synchronized record, tagged by its table.
///
/// Collections in the local cache and rows on the wire are stored untagged
/// (the table is known from the key or URL); use [`Record::to_row`] /
/// [`Record::from_row`] for those paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "row")]
pub enum Record {
    #[serde(rename = "activities")]
    Activity(ActivityRecord),
    #[serde(rename = "habits")]
    Habit(HabitRecord),
    #[serde(rename = "completions")]
    Completion(CompletionRecord),
    #[serde(rename = "cycle_data")]
    CycleSnapshot(CycleSnapshotRecord),
    #[serde(rename = "reflections")]
    Reflection(ReflectionRecord),
}

impl Record {
    pub fn table(&self) -> SyncTable {
        match self {
            Record::Activity(_) => SyncTable::Activities,
            Record::Habit(_) => SyncTable::Habits,
            Record::Completion(_) => SyncTable::Completions,
            Record::CycleSnapshot(_) => SyncTable::CycleData,
            Record::Reflection(_) => SyncTable::Reflections,
        }
    }

    pub fn meta(&self) -> &RecordMeta {
        match self {
            Record::Activity(r) => &r.meta,
            Record::Habit(r) => &r.meta,
            Record::Completion(r) => &r.meta,
            Record::CycleSnapshot(r) => &r.meta,
            Record::Reflection(r) => &r.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut RecordMeta {
        match self {
            Record::Activity(r) => &mut r.meta,
            Record::Habit(r) => &mut r.meta,
            Record::Completion(r) => &mut r.meta,
            Record::CycleSnapshot(r) => &mut r.meta,
            Record::Reflection(r) => &mut r.meta,
        }
    }

    pub fn id(&self) -> &str {
        &self.meta().id
    }

    /// Serialize as a bare row object (no table tag).
    pub fn to_row(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Record::Activity(r) => serde_json::to_value(r),
            Record::Habit(r) => serde_json::to_value(r),
            Record::Completion(r) => serde_json::to_value(r),
            Record::CycleSnapshot(r) => serde_json::to_value(r),
            Record::Reflection(r) => serde_json::to_value(r),
        }
    }

    /// Decode a bare row object for a known table.
    pub fn from_row(
        table: SyncTable,
        row: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(match table {
            SyncTable::Activities => Record::Activity(serde_json::from_value(row)?),
            SyncTable::Habits => Record::Habit(serde_json::from_value(row)?),
            SyncTable::Completions => Record::Completion(serde_json::from_value(row)?),
            SyncTable::CycleData => Record::CycleSnapshot(serde_json::from_value(row)?),
            SyncTable::Reflections => Record::Reflection(serde_json::from_value(row)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_table_serialization_matches_backend_contract() {
        let actual = SyncTable::ALL
            .iter()
            .map(|table| serde_json::to_string(table).expect("serialize sync table"))
            .collect::<Vec<_>>();

        let expected = vec![
            "\"activities\"",
            "\"habits\"",
            "\"completions\"",
            "\"cycle_data\"",
            "\"reflections\"",
        ];

        assert_eq!(actual, expected);
    }

    #[test]
    fn record_row_roundtrip_keeps_flattened_meta() {
        let record = Record::Activity(ActivityRecord {
            meta: RecordMeta::new("0198c9a0-0000-7000-8000-000000000001"),
            name: "Run".to_string(),
            category: Some("fitness".to_string()),
            amount: 5.0,
            unit: "km".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
        });

        let row = record.to_row().expect("row");
        assert!(row.get("id").is_some(), "meta must be flattened into the row");
        assert!(row.get("meta").is_none());

        let back = Record::from_row(SyncTable::Activities, row).expect("decode");
        assert_eq!(back, record);
    }

    #[test]
    fn effective_timestamp_falls_back_to_created_at() {
        let mut meta = RecordMeta::new("r1");
        let created = meta.created_at;
        meta.updated_at = None;
        assert_eq!(meta.effective_timestamp(), created);
    }

    #[test]
    fn rows_without_optional_meta_fields_decode() {
        let row = serde_json::json!({
            "id": "c0ffee00-1111-4222-8333-444444444444",
            "createdAt": "2026-01-02T03:04:05Z",
            "habitId": "c0ffee00-1111-4222-8333-555555555555",
            "date": "2026-01-02",
        });
        let record = Record::from_row(SyncTable::Completions, row).expect("decode");
        assert!(record.meta().updated_at.is_none());
        assert!(record.meta().device_id.is_none());
    }
}
