use chrono::NaiveDate;
use tracing::warn;
use ulid::Ulid;

use crate::model::*;

use super::availability::{filter_by_run, slot_availability};
use super::{Engine, EngineError};

impl Engine {
    pub fn list_rooms(&self) -> Vec<RoomInfo> {
        let mut rooms: Vec<RoomInfo> = self
            .rooms
            .iter()
            .map(|entry| {
                let room = entry.value().clone();
                let guard = room.try_read().expect("list_rooms: uncontended read");
                RoomInfo {
                    id: guard.id,
                    name: guard.name.clone(),
                    capacity: guard.capacity,
                    building: guard.building.clone(),
                }
            })
            .collect();
        rooms.sort_by_key(|r| r.id);
        rooms
    }

    pub async fn list_modules(&self) -> Vec<ModuleSlot> {
        self.grid.read().await.slots().to_vec()
    }

    pub fn list_exams(&self) -> Vec<ExamState> {
        let mut exams: Vec<ExamState> = self.exams.iter().map(|e| e.value().clone()).collect();
        exams.sort_by_key(|e| e.id);
        for exam in &exams {
            if let Err(e) = self.check_exam_consistency(exam) {
                warn!("consistency check: {e}");
            }
        }
        exams
    }

    /// Read one exam, cross-checking status against live placements. An
    /// exam marked Scheduled with no placement (or the reverse) can only
    /// come from a broken commit path and is surfaced, never smoothed over.
    pub fn get_exam(&self, id: Ulid) -> Result<ExamState, EngineError> {
        let exam = self
            .exams
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(id))?;
        self.check_exam_consistency(&exam)?;
        Ok(exam)
    }

    fn check_exam_consistency(&self, exam: &ExamState) -> Result<(), EngineError> {
        let live = self
            .exam_reservations
            .get(&exam.id)
            .is_some_and(|live| !live.is_empty());
        match (exam.status, live) {
            (ExamStatus::Scheduled, false) => {
                warn!("exam {} marked scheduled without a reservation", exam.id);
                Err(EngineError::Inconsistent {
                    exam: exam.id,
                    detail: "marked scheduled but has no reservation",
                })
            }
            (ExamStatus::Unscheduled, true) => {
                warn!("exam {} has a reservation but is marked unscheduled", exam.id);
                Err(EngineError::Inconsistent {
                    exam: exam.id,
                    detail: "has a reservation but is marked unscheduled",
                })
            }
            _ => Ok(()),
        }
    }

    /// Per-ordinal occupancy for one room/date. Advisory — see the conflict
    /// module for why only the writer's own check is authoritative. With
    /// `min_run`, only free slots inside a run of at least that many modules
    /// are returned.
    pub async fn availability(
        &self,
        room_id: Ulid,
        date: NaiveDate,
        min_run: Option<u16>,
    ) -> Result<Vec<SlotAvailability>, EngineError> {
        let room = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = room.read().await;
        let grid = self.grid.read().await;
        let slots = slot_availability(&grid, &guard, date);
        Ok(match min_run {
            Some(run_len) => filter_by_run(slots, run_len),
            None => slots,
        })
    }

    /// Reservations for one room, optionally narrowed to a date; or across
    /// all rooms when `room_id` is None.
    pub async fn list_reservations(
        &self,
        room_id: Option<Ulid>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<ReservationInfo>, EngineError> {
        let room_ids: Vec<Ulid> = match room_id {
            Some(id) => {
                if !self.rooms.contains_key(&id) {
                    return Err(EngineError::NotFound(id));
                }
                vec![id]
            }
            None => {
                let mut ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();
                ids.sort();
                ids
            }
        };

        let mut out = Vec::new();
        for id in room_ids {
            let Some(room) = self.get_room(&id) else {
                continue;
            };
            let guard = room.read().await;
            for reservation in &guard.reservations {
                if let Some(d) = date
                    && reservation.date != d
                {
                    continue;
                }
                out.push(ReservationInfo {
                    id: reservation.id,
                    room_id: id,
                    exam_id: reservation.exam_id,
                    date: reservation.date,
                    ordinals: reservation.ordinals.clone(),
                    confirmed: reservation.confirmed,
                });
            }
        }
        Ok(out)
    }
}
