//! Conflict resolution between two versions of the same record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::models::{Record, RecordMeta};

use super::model::TIE_WINDOW_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictWinner {
    Local,
    Remote,
}

/// How to break a tie when timestamps are within [`TIE_WINDOW_MS`].
///
/// The realtime path breaks ties by device id; the initial-sync path
/// prefers the local version so an edit made just before login is not lost
/// to a coincidentally-timed remote write. The two policies are
/// deliberately distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiePolicy {
    DeviceId,
    PreferLocal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionReason {
    NewerLocal,
    NewerRemote,
    DeviceTiebreakLocal,
    DeviceTiebreakRemote,
    LocalPreferredOnTie,
}

/// Outcome of one resolution. Ephemeral; logged as a sync event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolution {
    pub winner: ConflictWinner,
    pub reason: ResolutionReason,
    pub resolved_at: DateTime<Utc>,
}

/// Pick a winner between local and remote versions of one record.
///
/// Timestamps further apart than [`TIE_WINDOW_MS`] resolve by
/// last-write-wins. Within the window the tie policy applies; the device-id
/// comparison is lexicographic so every replica resolves the same tie the
/// same way without coordination. Timestamps are trusted as given (device
/// clocks are assumed roughly sane).
pub fn resolve(
    local: &RecordMeta,
    remote: &RecordMeta,
    local_device_id: &str,
    policy: TiePolicy,
) -> ConflictResolution {
    let resolved_at = Utc::now();
    let local_ms = local.effective_timestamp().timestamp_millis();
    let remote_ms = remote.effective_timestamp().timestamp_millis();
    let delta = remote_ms - local_ms;

    if delta.abs() > TIE_WINDOW_MS {
        let (winner, reason) = if delta > 0 {
            (ConflictWinner::Remote, ResolutionReason::NewerRemote)
        } else {
            (ConflictWinner::Local, ResolutionReason::NewerLocal)
        };
        return ConflictResolution {
            winner,
            reason,
            resolved_at,
        };
    }

    match policy {
        TiePolicy::PreferLocal => ConflictResolution {
            winner: ConflictWinner::Local,
            reason: ResolutionReason::LocalPreferredOnTie,
            resolved_at,
        },
        TiePolicy::DeviceId => {
            let local_device = local.device_id.as_deref().unwrap_or(local_device_id);
            let remote_device = remote.device_id.as_deref().unwrap_or("");
            if remote_device > local_device {
                ConflictResolution {
                    winner: ConflictWinner::Remote,
                    reason: ResolutionReason::DeviceTiebreakRemote,
                    resolved_at,
                }
            } else {
                ConflictResolution {
                    winner: ConflictWinner::Local,
                    reason: ResolutionReason::DeviceTiebreakLocal,
                    resolved_at,
                }
            }
        }
    }
}

/// Field-level merge: start from the loser's row, then overwrite every
/// field that differs with the winner's value. Fields only the loser has
/// survive; conflicting fields fully defer to the winner.
pub fn merge(local: &Record, remote: &Record, winner: ConflictWinner) -> Result<Record> {
    let (winning, losing) = match winner {
        ConflictWinner::Local => (local, remote),
        ConflictWinner::Remote => (remote, local),
    };

    let mut base = losing.to_row()?;
    let winning_row = winning.to_row()?;
    if let (Some(base_map), Some(winning_map)) = (base.as_object_mut(), winning_row.as_object()) {
        for (field, value) in winning_map {
            if base_map.get(field) != Some(value) {
                base_map.insert(field.clone(), value.clone());
            }
        }
    }

    Ok(Record::from_row(local.table(), base)?)
}
