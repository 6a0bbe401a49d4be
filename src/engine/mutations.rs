use std::collections::HashMap;

use chrono::NaiveDate;
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::selection::validate_block;

use super::conflict::{check_batch_disjoint, check_no_conflict};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    pub async fn create_room(
        &self,
        id: Ulid,
        name: String,
        capacity: u32,
        building: Option<String>,
    ) -> Result<(), EngineError> {
        if self.rooms.len() >= MAX_ROOMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("room name too long"));
        }
        if let Some(ref b) = building
            && b.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("building name too long"));
        }
        if self.rooms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let record = Event::RoomCreated {
            id,
            name: name.clone(),
            capacity,
            building: building.clone(),
        };
        self.wal_append(&record).await?;
        self.rooms.insert(
            id,
            std::sync::Arc::new(tokio::sync::RwLock::new(RoomState::new(
                id, name, capacity, building,
            ))),
        );
        self.notify.send(id, &record);
        Ok(())
    }

    /// Update catalog fields of a room. `None` keeps the current value.
    pub async fn update_room(
        &self,
        id: Ulid,
        name: Option<String>,
        capacity: Option<u32>,
        building: Option<String>,
    ) -> Result<(), EngineError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("room name too long"));
        }
        let room = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = room.write().await;

        let record = Event::RoomUpdated {
            id,
            name: name.unwrap_or_else(|| guard.name.clone()),
            capacity: capacity.unwrap_or(guard.capacity),
            building: building.or_else(|| guard.building.clone()),
        };
        self.wal_append(&record).await?;
        if let Event::RoomUpdated {
            name,
            capacity,
            building,
            ..
        } = &record
        {
            guard.name = name.clone();
            guard.capacity = *capacity;
            guard.building = building.clone();
        }
        self.notify.send(id, &record);
        Ok(())
    }

    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let room = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let guard = room.write().await;
        if !guard.reservations.is_empty() {
            return Err(EngineError::HasReservations(id));
        }

        let record = Event::RoomDeleted { id };
        self.wal_append(&record).await?;
        drop(guard);
        self.rooms.remove(&id);
        self.notify.send(id, &record);
        Ok(())
    }

    /// Append the next module to the shared grid. The grid is setup-time
    /// reference data: ordinals must arrive densely, times must be monotonic,
    /// and existing slots are never redefined.
    pub async fn define_module(
        &self,
        ordinal: u16,
        start_min: Minute,
        end_min: Minute,
    ) -> Result<(), EngineError> {
        let mut grid = self.grid.write().await;
        if grid.len() >= MAX_MODULES_PER_GRID {
            return Err(EngineError::LimitExceeded("module grid full"));
        }
        if ordinal != grid.len() + 1 {
            return Err(EngineError::GridOrder("ordinals must extend the grid densely"));
        }
        if start_min >= end_min {
            return Err(EngineError::GridOrder("module must start before it ends"));
        }
        if let Some(prev) = grid.slots().last()
            && start_min < prev.end_min
        {
            return Err(EngineError::GridOrder("module overlaps the previous slot"));
        }

        let record = Event::ModuleDefined {
            ordinal,
            start_min,
            end_min,
        };
        self.wal_append(&record).await?;
        grid.push(ModuleSlot {
            ordinal,
            start_min,
            end_min,
        });
        Ok(())
    }

    /// Catalog path: create an exam with no placement yet.
    pub async fn create_exam(
        &self,
        id: Ulid,
        subject: String,
        modules_required: u16,
    ) -> Result<(), EngineError> {
        validate_exam_shape(&subject, modules_required)?;
        if self.exams.len() >= MAX_EXAMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many exams"));
        }
        if self.exams.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let record = Event::ExamCreated {
            id,
            subject: subject.clone(),
            modules_required,
        };
        self.wal_append(&record).await?;
        self.exams.insert(
            id,
            ExamState {
                id,
                subject,
                modules_required,
                status: ExamStatus::Unscheduled,
            },
        );
        Ok(())
    }

    pub async fn delete_exam(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.exams.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        if self
            .exam_reservations
            .get(&id)
            .is_some_and(|live| !live.is_empty())
        {
            return Err(EngineError::HasReservations(id));
        }

        let record = Event::ExamDeleted { id };
        self.wal_append(&record).await?;
        self.exams.remove(&id);
        self.exam_reservations.remove(&id);
        Ok(())
    }

    /// One atomic scheduling commit: bind an exam (existing or drafted in
    /// this commit) to one or more placements. All-or-nothing — a conflict
    /// or WAL failure anywhere leaves no exam and no reservations behind.
    ///
    /// Re-scheduling replaces: every prior placement of the exam is
    /// superseded by this commit's placements.
    pub async fn schedule(
        &self,
        exam: ExamRef,
        placements: Vec<Placement>,
    ) -> Result<(), EngineError> {
        if placements.is_empty() {
            return Err(EngineError::LimitExceeded(
                "scheduling commit needs at least one placement",
            ));
        }
        if placements.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }

        let (exam_id, new_exam, modules_required) = match &exam {
            ExamRef::Existing(id) => {
                let exam = self.exams.get(id).ok_or(EngineError::NotFound(*id))?;
                (*id, None, exam.modules_required)
            }
            ExamRef::Draft(draft) => {
                validate_exam_shape(&draft.subject, draft.modules_required)?;
                if self.exams.len() >= MAX_EXAMS_PER_TENANT {
                    return Err(EngineError::LimitExceeded("too many exams"));
                }
                if self.exams.contains_key(&draft.id) {
                    return Err(EngineError::AlreadyExists(draft.id));
                }
                (draft.id, Some(draft.clone()), draft.modules_required)
            }
        };

        // Structural rules first; they need no locks and most rejects are
        // cheap client mistakes.
        {
            let grid = self.grid.read().await;
            for placement in &placements {
                validate_block(&grid, modules_required, &placement.ordinals)
                    .map_err(EngineError::Selection)?;
            }
        }
        check_batch_disjoint(&placements)?;

        // Client-generated reservation ids double as idempotence tokens: a
        // resubmitted commit answers AlreadyExists instead of double-booking.
        for (i, placement) in placements.iter().enumerate() {
            if self
                .reservation_to_room
                .contains_key(&placement.reservation_id)
            {
                return Err(EngineError::AlreadyExists(placement.reservation_id));
            }
            if placements[..i]
                .iter()
                .any(|p| p.reservation_id == placement.reservation_id)
            {
                return Err(EngineError::AlreadyExists(placement.reservation_id));
            }
        }

        // Replace-on-reschedule: prior placements of this exam leave in this
        // commit, so their rooms are locked too and they don't count as
        // occupancy below. The lock set depends on the live set, so re-read
        // it once the locks are held and rebuild if a racing commit for the
        // same exam got in between.
        let (replaces, replaced_rooms, mut guards, guard_idx, room_ids) = loop {
            let replaces: Vec<Ulid> = self
                .exam_reservations
                .get(&exam_id)
                .map(|live| live.clone())
                .unwrap_or_default();
            let mut replaced_rooms: Vec<(Ulid, Ulid)> = Vec::with_capacity(replaces.len());
            for reservation_id in &replaces {
                let room_id = self.room_of_reservation(reservation_id).ok_or(
                    EngineError::Inconsistent {
                        exam: exam_id,
                        detail: "live reservation has no owning room",
                    },
                )?;
                replaced_rooms.push((*reservation_id, room_id));
            }

            // Acquire write locks in sorted order to prevent deadlocks.
            let mut room_ids: Vec<Ulid> = placements.iter().map(|p| p.room_id).collect();
            room_ids.extend(replaced_rooms.iter().map(|(_, room_id)| *room_id));
            room_ids.sort();
            room_ids.dedup();

            let mut guards = Vec::with_capacity(room_ids.len());
            let mut guard_idx = HashMap::new();
            for room_id in &room_ids {
                let room = self.get_room(room_id).ok_or(EngineError::NotFound(*room_id))?;
                let guard = room.write_owned().await;
                if guard.reservations.len() + placements.len() > MAX_RESERVATIONS_PER_ROOM {
                    return Err(EngineError::LimitExceeded("too many reservations in room"));
                }
                guard_idx.insert(*room_id, guards.len());
                guards.push(guard);
            }

            let live_now: Vec<Ulid> = self
                .exam_reservations
                .get(&exam_id)
                .map(|live| live.clone())
                .unwrap_or_default();
            if live_now == replaces {
                break (replaces, replaced_rooms, guards, guard_idx, room_ids);
            }
        };

        // The authoritative conflict check, against locked state.
        for placement in &placements {
            let guard = &guards[guard_idx[&placement.room_id]];
            if let Err(e) =
                check_no_conflict(guard, placement.date, &placement.ordinals, &replaces)
            {
                metrics::counter!(crate::observability::RESERVATION_CONFLICTS_TOTAL)
                    .increment(1);
                return Err(e);
            }
        }

        let record = Event::ExamScheduled {
            exam_id,
            new_exam: new_exam.clone(),
            replaces: replaces.clone(),
            placements: placements.clone(),
        };
        self.wal_append(&record).await?;

        if let Some(draft) = new_exam {
            self.exams.insert(
                draft.id,
                ExamState {
                    id: draft.id,
                    subject: draft.subject,
                    modules_required: draft.modules_required,
                    status: ExamStatus::Unscheduled,
                },
            );
        }
        for (reservation_id, room_id) in &replaced_rooms {
            self.detach_reservation(&mut guards[guard_idx[room_id]], *reservation_id);
        }
        for placement in &placements {
            self.attach_placement(
                &mut guards[guard_idx[&placement.room_id]],
                exam_id,
                placement,
            );
        }
        self.refresh_exam_status(exam_id);

        metrics::counter!(crate::observability::RESERVATIONS_COMMITTED_TOTAL)
            .increment(placements.len() as u64);
        for room_id in &room_ids {
            self.notify.send(*room_id, &record);
        }
        Ok(())
    }

    /// Edit-in-place: re-home a reservation, excluding itself from the
    /// conflict check. Confirmation is cleared — the teacher confirmed a
    /// different room/time.
    pub async fn move_reservation(
        &self,
        reservation_id: Ulid,
        to_room: Ulid,
        date: NaiveDate,
        ordinals: Vec<u16>,
    ) -> Result<(), EngineError> {
        let from_room = self
            .room_of_reservation(&reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?;

        let mut room_ids = vec![from_room, to_room];
        room_ids.sort();
        room_ids.dedup();

        let mut guards = Vec::with_capacity(room_ids.len());
        let mut guard_idx = HashMap::new();
        for room_id in &room_ids {
            let room = self.get_room(room_id).ok_or(EngineError::NotFound(*room_id))?;
            guard_idx.insert(*room_id, guards.len());
            guards.push(room.write_owned().await);
        }

        let exam_id = guards[guard_idx[&from_room]]
            .get_reservation(reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?
            .exam_id;
        let modules_required = self
            .exams
            .get(&exam_id)
            .map(|e| e.modules_required)
            .ok_or(EngineError::Inconsistent {
                exam: exam_id,
                detail: "reservation references a missing exam",
            })?;

        {
            let grid = self.grid.read().await;
            validate_block(&grid, modules_required, &ordinals)
                .map_err(EngineError::Selection)?;
        }
        if let Err(e) = check_no_conflict(
            &guards[guard_idx[&to_room]],
            date,
            &ordinals,
            &[reservation_id],
        ) {
            metrics::counter!(crate::observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let record = Event::ReservationMoved {
            reservation_id,
            from_room,
            to_room,
            date,
            ordinals: ordinals.clone(),
        };
        self.wal_append(&record).await?;

        // Presence was verified under the held lock; the detach cannot miss.
        self.detach_reservation(&mut guards[guard_idx[&from_room]], reservation_id)
            .expect("reservation vanished under held lock");
        self.attach_placement(
            &mut guards[guard_idx[&to_room]],
            exam_id,
            &Placement {
                reservation_id,
                room_id: to_room,
                date,
                ordinals,
            },
        );
        for room_id in &room_ids {
            self.notify.send(*room_id, &record);
        }
        Ok(())
    }

    /// Downstream teacher-confirmation hook. Idempotent.
    pub async fn confirm_reservation(&self, reservation_id: Ulid) -> Result<Ulid, EngineError> {
        let room_id = self
            .room_of_reservation(&reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        let room = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = room.write().await;
        let reservation = guard
            .get_reservation(reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        if reservation.confirmed {
            return Ok(room_id);
        }

        let record = Event::ReservationConfirmed {
            reservation_id,
            room_id,
        };
        self.wal_append(&record).await?;
        self.mark_confirmed(&mut guard, reservation_id);
        self.notify.send(room_id, &record);
        Ok(room_id)
    }

    pub async fn cancel_reservation(&self, reservation_id: Ulid) -> Result<Ulid, EngineError> {
        let room_id = self
            .room_of_reservation(&reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        let room = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = room.write().await;
        let exam_id = guard
            .get_reservation(reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?
            .exam_id;

        let record = Event::ReservationCancelled {
            reservation_id,
            room_id,
            exam_id,
        };
        self.wal_append(&record).await?;
        self.detach_reservation(&mut guard, reservation_id);
        self.refresh_exam_status(exam_id);
        self.notify.send(room_id, &record);
        Ok(room_id)
    }

    /// Rewrite the WAL with only the records needed to recreate current
    /// state: rooms, grid, exams, one scheduling commit per exam, then
    /// confirmations.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut records = Vec::new();

        let room_ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();
        let mut placements_by_exam: HashMap<Ulid, Vec<Placement>> = HashMap::new();
        let mut confirmed: Vec<(Ulid, Ulid)> = Vec::new();

        for room_id in room_ids {
            let Some(room) = self.get_room(&room_id) else {
                continue;
            };
            let guard = room.read().await;
            records.push(Event::RoomCreated {
                id: guard.id,
                name: guard.name.clone(),
                capacity: guard.capacity,
                building: guard.building.clone(),
            });
            for reservation in &guard.reservations {
                placements_by_exam
                    .entry(reservation.exam_id)
                    .or_default()
                    .push(Placement {
                        reservation_id: reservation.id,
                        room_id: guard.id,
                        date: reservation.date,
                        ordinals: reservation.ordinals.clone(),
                    });
                if reservation.confirmed {
                    confirmed.push((reservation.id, guard.id));
                }
            }
        }

        {
            let grid = self.grid.read().await;
            for slot in grid.slots() {
                records.push(Event::ModuleDefined {
                    ordinal: slot.ordinal,
                    start_min: slot.start_min,
                    end_min: slot.end_min,
                });
            }
        }

        for exam in self.exams.iter() {
            records.push(Event::ExamCreated {
                id: exam.id,
                subject: exam.subject.clone(),
                modules_required: exam.modules_required,
            });
        }
        for (exam_id, placements) in placements_by_exam {
            records.push(Event::ExamScheduled {
                exam_id,
                new_exam: None,
                replaces: Vec::new(),
                placements,
            });
        }
        for (reservation_id, room_id) in confirmed {
            records.push(Event::ReservationConfirmed {
                reservation_id,
                room_id,
            });
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Snapshot {
                records,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_snapshot(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceSnapshot { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn validate_exam_shape(subject: &str, modules_required: u16) -> Result<(), EngineError> {
    if modules_required == 0 {
        return Err(EngineError::LimitExceeded("exam requires at least one module"));
    }
    if modules_required > MAX_MODULES_PER_EXAM {
        return Err(EngineError::LimitExceeded("exam module count too large"));
    }
    if subject.len() > MAX_SUBJECT_LEN {
        return Err(EngineError::LimitExceeded("subject too long"));
    }
    Ok(())
}
