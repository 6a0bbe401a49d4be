use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

// The authoritative occupancy check. The availability read path reuses the
// same room state but is advisory; only a call made while holding the room's
// write lock closes the check/commit gap.

/// Err(SlotTaken) iff any candidate ordinal is already reserved for this
/// room/date. `exclude` lists reservations being superseded in the same
/// commit (edit-in-place, replace-on-reschedule).
pub(crate) fn check_no_conflict(
    room: &RoomState,
    date: NaiveDate,
    ordinals: &[u16],
    exclude: &[Ulid],
) -> Result<(), EngineError> {
    for reservation in room.on_date(date) {
        if exclude.contains(&reservation.id) {
            continue;
        }
        for &ordinal in ordinals {
            if reservation.occupies(ordinal) {
                return Err(EngineError::SlotTaken {
                    reservation: reservation.id,
                    ordinal,
                });
            }
        }
    }
    Ok(())
}

/// Reject placements inside one batch that overlap each other. The store
/// check above only sees committed state; two placements in the same commit
/// must also be mutually disjoint.
pub(crate) fn check_batch_disjoint(placements: &[Placement]) -> Result<(), EngineError> {
    for i in 0..placements.len() {
        for j in (i + 1)..placements.len() {
            let (a, b) = (&placements[i], &placements[j]);
            if a.room_id != b.room_id || a.date != b.date {
                continue;
            }
            if let Some(&ordinal) = a.ordinals.iter().find(|&&o| b.ordinals.contains(&o)) {
                return Err(EngineError::SlotTaken {
                    reservation: a.reservation_id,
                    ordinal,
                });
            }
        }
    }
    Ok(())
}
