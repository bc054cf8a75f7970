//! Read-model projection of activities into date-indexed form.
//!
//! The calendar UI consumes activities grouped by day. This is purely a
//! projection of the merged collection; the merge itself stays
//! table-agnostic.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::cache::{LocalCache, ACTIVITIES_BY_DATE_KEY};
use crate::errors::Result;
use crate::models::{ActivityRecord, Record};

/// Group activity records by day.
pub fn activities_by_date(records: &[Record]) -> BTreeMap<NaiveDate, Vec<ActivityRecord>> {
    let mut index: BTreeMap<NaiveDate, Vec<ActivityRecord>> = BTreeMap::new();
    for record in records {
        if let Record::Activity(activity) = record {
            index.entry(activity.date).or_default().push(activity.clone());
        }
    }
    index
}

/// Rebuild and persist the date index from a merged activities collection.
pub fn rebuild_activity_index(cache: &dyn LocalCache, records: &[Record]) -> Result<()> {
    let index = activities_by_date(records);
    let keyed: BTreeMap<String, &Vec<ActivityRecord>> = index
        .iter()
        .map(|(date, entries)| (date.format("%Y-%m-%d").to_string(), entries))
        .collect();
    cache.set(ACTIVITIES_BY_DATE_KEY, &serde_json::to_string(&keyed)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::models::RecordMeta;

    fn activity(id: &str, day: u32) -> Record {
        Record::Activity(ActivityRecord {
            meta: RecordMeta::new(id),
            name: "Walk".to_string(),
            category: None,
            amount: 1.0,
            unit: "km".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 4, day).unwrap(),
        })
    }

    #[test]
    fn groups_by_day_and_skips_other_tables() {
        use crate::models::{HabitRecord, Record};

        let records = vec![
            activity("a1", 1),
            activity("a2", 1),
            activity("a3", 2),
            Record::Habit(HabitRecord {
                meta: RecordMeta::new("h1"),
                name: "Read".to_string(),
                icon: None,
                color: None,
                target_per_week: 3,
                archived: false,
            }),
        ];

        let index = activities_by_date(&records);
        assert_eq!(index.len(), 2);
        assert_eq!(index[&NaiveDate::from_ymd_opt(2026, 4, 1).unwrap()].len(), 2);
        assert_eq!(index[&NaiveDate::from_ymd_opt(2026, 4, 2).unwrap()].len(), 1);
    }

    #[test]
    fn persisted_index_is_keyed_by_iso_date() {
        let cache = MemoryCache::new();
        rebuild_activity_index(&cache, &[activity("a1", 9)]).unwrap();

        let raw = cache.get(ACTIVITIES_BY_DATE_KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value.get("2026-04-09").is_some());
    }
}
