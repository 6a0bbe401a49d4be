use std::collections::BTreeSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────
//
// Read path only. Everything here is advisory: the answer can be stale by
// the time a write lands, which is why the writer re-runs the conflict check
// under the room's write lock before committing.

/// Flatten the ordinal sets of all reservations for (room, date).
/// `exclude` skips one reservation, for edit-in-place previews.
pub fn occupied_ordinals(
    room: &RoomState,
    date: NaiveDate,
    exclude: Option<Ulid>,
) -> BTreeSet<u16> {
    let mut occupied = BTreeSet::new();
    for reservation in room.on_date(date) {
        if exclude == Some(reservation.id) {
            continue;
        }
        occupied.extend(reservation.ordinals.iter().copied());
    }
    occupied
}

/// Per-ordinal grid status for one room/date. Covers every grid slot so the
/// caller can render the full column without consulting the grid again.
pub fn slot_availability(
    grid: &ModuleGrid,
    room: &RoomState,
    date: NaiveDate,
) -> Vec<SlotAvailability> {
    let occupied = occupied_ordinals(room, date, None);
    grid.slots()
        .iter()
        .map(|slot| SlotAvailability {
            ordinal: slot.ordinal,
            start_min: slot.start_min,
            end_min: slot.end_min,
            occupied: occupied.contains(&slot.ordinal),
        })
        .collect()
}

/// Contiguous runs of free ordinals, as inclusive (first, last) pairs.
pub fn free_runs(slots: &[SlotAvailability]) -> Vec<(u16, u16)> {
    let mut runs = Vec::new();
    let mut current: Option<(u16, u16)> = None;
    for slot in slots {
        if slot.occupied {
            if let Some(run) = current.take() {
                runs.push(run);
            }
        } else {
            current = match current {
                Some((first, _)) => Some((first, slot.ordinal)),
                None => Some((slot.ordinal, slot.ordinal)),
            };
        }
    }
    if let Some(run) = current {
        runs.push(run);
    }
    runs
}

/// Keep only free slots sitting inside a free run of at least `run_len`
/// modules. Occupied slots are dropped entirely; a client asking for
/// "where does a 3-module exam still fit" gets exactly the placeable cells.
pub fn filter_by_run(slots: Vec<SlotAvailability>, run_len: u16) -> Vec<SlotAvailability> {
    let runs = free_runs(&slots);
    slots
        .into_iter()
        .filter(|slot| {
            !slot.occupied
                && runs.iter().any(|&(first, last)| {
                    slot.ordinal >= first
                        && slot.ordinal <= last
                        && last - first + 1 >= run_len
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn grid(n: u16) -> ModuleGrid {
        let mut grid = ModuleGrid::new();
        for i in 1..=n {
            grid.push(ModuleSlot {
                ordinal: i,
                start_min: 480 + (i - 1) * 100,
                end_min: 570 + (i - 1) * 100,
            });
        }
        grid
    }

    fn room_with(reservations: Vec<(&str, Vec<u16>)>) -> RoomState {
        let mut room = RoomState::new(Ulid::new(), "A-101".into(), 40, None);
        for (d, ordinals) in reservations {
            room.insert_reservation(Reservation {
                id: Ulid::new(),
                exam_id: Ulid::new(),
                date: date(d),
                ordinals,
                confirmed: false,
            });
        }
        room
    }

    #[test]
    fn occupied_flattens_all_reservations() {
        let room = room_with(vec![("2025-07-01", vec![1, 2]), ("2025-07-01", vec![5, 6])]);
        let occupied = occupied_ordinals(&room, date("2025-07-01"), None);
        assert_eq!(occupied.into_iter().collect::<Vec<_>>(), vec![1, 2, 5, 6]);
    }

    #[test]
    fn occupied_ignores_other_dates() {
        let room = room_with(vec![("2025-07-01", vec![1, 2]), ("2025-07-02", vec![3, 4])]);
        let occupied = occupied_ordinals(&room, date("2025-07-01"), None);
        assert_eq!(occupied.into_iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn occupied_excludes_edited_reservation() {
        let mut room = room_with(vec![("2025-07-01", vec![1, 2])]);
        let edited = Reservation {
            id: Ulid::new(),
            exam_id: Ulid::new(),
            date: date("2025-07-01"),
            ordinals: vec![4, 5],
            confirmed: false,
        };
        let edited_id = edited.id;
        room.insert_reservation(edited);
        let occupied = occupied_ordinals(&room, date("2025-07-01"), Some(edited_id));
        assert_eq!(occupied.into_iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn slot_availability_covers_whole_grid() {
        let room = room_with(vec![("2025-07-01", vec![2, 3])]);
        let slots = slot_availability(&grid(4), &room, date("2025-07-01"));
        assert_eq!(slots.len(), 4);
        assert_eq!(
            slots.iter().map(|s| s.occupied).collect::<Vec<_>>(),
            vec![false, true, true, false]
        );
        assert_eq!(slots[0].start_min, 480);
    }

    #[test]
    fn slot_availability_empty_room_all_free() {
        let room = room_with(vec![]);
        let slots = slot_availability(&grid(3), &room, date("2025-07-01"));
        assert!(slots.iter().all(|s| !s.occupied));
    }

    #[test]
    fn free_runs_basic() {
        let room = room_with(vec![("2025-07-01", vec![3])]);
        let slots = slot_availability(&grid(6), &room, date("2025-07-01"));
        assert_eq!(free_runs(&slots), vec![(1, 2), (4, 6)]);
    }

    #[test]
    fn free_runs_fully_booked() {
        let room = room_with(vec![("2025-07-01", vec![1, 2, 3])]);
        let slots = slot_availability(&grid(3), &room, date("2025-07-01"));
        assert!(free_runs(&slots).is_empty());
    }

    #[test]
    fn filter_by_run_drops_short_runs() {
        // Free runs are [1,2] and [4,6]; only the second fits 3 modules.
        let room = room_with(vec![("2025-07-01", vec![3])]);
        let slots = slot_availability(&grid(6), &room, date("2025-07-01"));
        let fit = filter_by_run(slots, 3);
        assert_eq!(
            fit.iter().map(|s| s.ordinal).collect::<Vec<_>>(),
            vec![4, 5, 6]
        );
    }

    #[test]
    fn filter_by_run_one_is_every_free_slot() {
        let room = room_with(vec![("2025-07-01", vec![3])]);
        let slots = slot_availability(&grid(4), &room, date("2025-07-01"));
        let fit = filter_by_run(slots, 1);
        assert_eq!(
            fit.iter().map(|s| s.ordinal).collect::<Vec<_>>(),
            vec![1, 2, 4]
        );
    }
}
