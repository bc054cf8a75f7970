//! Pre-send validation for records and queued operations.
//!
//! Entries that fail here can never succeed remotely and are dropped
//! without retry.

use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::models::Record;

use super::model::{OperationPayload, QueueEntry};

/// Canonical record ids are UUIDs. Early builds wrote counter-based
/// placeholder ids ("habit-1", "entry-3"); those never sync.
pub fn is_canonical_id(id: &str) -> bool {
    Uuid::parse_str(id.trim()).is_ok()
}

/// Validate a record's shape for the remote store.
pub fn validate_record(record: &Record) -> Result<()> {
    if !is_canonical_id(record.id()) {
        return Err(Error::Validation(format!(
            "record id '{}' is not a canonical id",
            record.id()
        )));
    }

    match record {
        Record::Activity(activity) => {
            if activity.name.trim().is_empty() {
                return Err(Error::Validation("activity name is required".to_string()));
            }
            if activity.unit.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "activity '{}' is missing its unit",
                    activity.meta.id
                )));
            }
        }
        Record::Habit(habit) => {
            if habit.name.trim().is_empty() {
                return Err(Error::Validation("habit name is required".to_string()));
            }
        }
        Record::Completion(completion) => {
            if !is_canonical_id(&completion.habit_id) {
                return Err(Error::Validation(format!(
                    "completion '{}' references non-canonical habit id '{}'",
                    completion.meta.id, completion.habit_id
                )));
            }
        }
        Record::CycleSnapshot(snapshot) => {
            if snapshot.cycle_length_days <= 0 || snapshot.period_length_days <= 0 {
                return Err(Error::Validation(format!(
                    "cycle snapshot '{}' has non-positive lengths",
                    snapshot.meta.id
                )));
            }
        }
        Record::Reflection(_) => {}
    }

    Ok(())
}

/// Validate a queue entry before attempting its remote write.
pub fn validate_entry(entry: &QueueEntry) -> Result<()> {
    match &entry.payload {
        OperationPayload::Upsert(record) => {
            validate_record(record)?;
            if record.meta().user_id.is_none() {
                return Err(Error::Validation(format!(
                    "queued upsert '{}' has no user id",
                    entry.id
                )));
            }
        }
        OperationPayload::Delete { record_id, user_id } => {
            if !is_canonical_id(record_id) {
                return Err(Error::Validation(format!(
                    "queued delete '{}' targets non-canonical id '{}'",
                    entry.id, record_id
                )));
            }
            if user_id.is_none() {
                return Err(Error::Validation(format!(
                    "queued delete '{}' has no user id",
                    entry.id
                )));
            }
        }
    }
    Ok(())
}
