mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use availability::{filter_by_run, free_runs, occupied_ordinals, slot_availability};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        record: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Snapshot {
        records: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceSnapshot {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { record, response } => {
                let mut batch = vec![(record, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { record, response }) => {
                            batch.push((record, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut buffer_err: Option<io::Error> = None;
    for (record, _) in batch.iter() {
        if let Err(e) = wal.buffer(record) {
            buffer_err = Some(e);
            break;
        }
    }
    // Always sync — even on a buffering error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let sync_err = wal.commit().err();
    if let Some(e) = buffer_err {
        return Err(e);
    }
    if let Some(e) = sync_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Snapshot { records, response } => {
            let result = Wal::write_snapshot(wal.path(), &records)
                .and_then(|()| wal.install_snapshot());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceSnapshot { response } => {
            let _ = response.send(wal.appends_since_snapshot());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

/// Per-tenant reservation store: rooms, the module grid, exams, and the
/// reservation indexes, durable through the WAL. The mutation methods in
/// `mutations.rs` are the only writers; reads take read locks only.
pub struct Engine {
    pub rooms: DashMap<Ulid, SharedRoomState>,
    pub exams: DashMap<Ulid, ExamState>,
    pub(super) grid: RwLock<ModuleGrid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: reservation id → owning room id.
    pub(super) reservation_to_room: DashMap<Ulid, Ulid>,
    /// Exam id → its live reservation ids.
    pub(super) exam_reservations: DashMap<Ulid, Vec<Ulid>>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let records = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            exams: DashMap::new(),
            grid: RwLock::new(ModuleGrid::new()),
            wal_tx,
            notify,
            reservation_to_room: DashMap::new(),
            exam_reservations: DashMap::new(),
        };

        // Replay — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention). Never use
        // blocking_read/blocking_write here because this may run inside an
        // async context (lazy tenant creation).
        for record in &records {
            engine.replay_record(record);
        }

        Ok(engine)
    }

    fn replay_record(&self, record: &Event) {
        match record {
            Event::RoomCreated {
                id,
                name,
                capacity,
                building,
            } => {
                let room = RoomState::new(*id, name.clone(), *capacity, building.clone());
                self.rooms.insert(*id, Arc::new(RwLock::new(room)));
            }
            Event::RoomUpdated {
                id,
                name,
                capacity,
                building,
            } => {
                if let Some(entry) = self.rooms.get(id) {
                    let room = entry.value().clone();
                    let mut guard = room.try_write().expect("replay: uncontended write");
                    guard.name = name.clone();
                    guard.capacity = *capacity;
                    guard.building = building.clone();
                }
            }
            Event::RoomDeleted { id } => {
                self.rooms.remove(id);
            }
            Event::ModuleDefined {
                ordinal,
                start_min,
                end_min,
            } => {
                let mut grid = self.grid.try_write().expect("replay: uncontended write");
                grid.push(ModuleSlot {
                    ordinal: *ordinal,
                    start_min: *start_min,
                    end_min: *end_min,
                });
            }
            Event::ExamCreated {
                id,
                subject,
                modules_required,
            } => {
                self.exams.insert(
                    *id,
                    ExamState {
                        id: *id,
                        subject: subject.clone(),
                        modules_required: *modules_required,
                        status: ExamStatus::Unscheduled,
                    },
                );
            }
            Event::ExamDeleted { id } => {
                self.exams.remove(id);
            }
            Event::ExamScheduled {
                exam_id,
                new_exam,
                replaces,
                placements,
            } => {
                if let Some(draft) = new_exam {
                    self.exams.insert(
                        draft.id,
                        ExamState {
                            id: draft.id,
                            subject: draft.subject.clone(),
                            modules_required: draft.modules_required,
                            status: ExamStatus::Unscheduled,
                        },
                    );
                }
                for reservation_id in replaces {
                    if let Some(room_id) = self.room_of_reservation(reservation_id)
                        && let Some(entry) = self.rooms.get(&room_id)
                    {
                        let room = entry.value().clone();
                        let mut guard = room.try_write().expect("replay: uncontended write");
                        self.detach_reservation(&mut guard, *reservation_id);
                    }
                }
                for placement in placements {
                    if let Some(entry) = self.rooms.get(&placement.room_id) {
                        let room = entry.value().clone();
                        let mut guard = room.try_write().expect("replay: uncontended write");
                        self.attach_placement(&mut guard, *exam_id, placement);
                    }
                }
                self.refresh_exam_status(*exam_id);
            }
            Event::ReservationMoved {
                reservation_id,
                from_room,
                to_room,
                date,
                ordinals,
            } => {
                let removed = self.rooms.get(from_room).and_then(|entry| {
                    let room = entry.value().clone();
                    let mut guard = room.try_write().expect("replay: uncontended write");
                    self.detach_reservation(&mut guard, *reservation_id)
                });
                if let Some(removed) = removed
                    && let Some(entry) = self.rooms.get(to_room)
                {
                    let room = entry.value().clone();
                    let mut guard = room.try_write().expect("replay: uncontended write");
                    self.attach_placement(
                        &mut guard,
                        removed.exam_id,
                        &Placement {
                            reservation_id: *reservation_id,
                            room_id: *to_room,
                            date: *date,
                            ordinals: ordinals.clone(),
                        },
                    );
                }
            }
            Event::ReservationConfirmed {
                reservation_id,
                room_id,
            } => {
                if let Some(entry) = self.rooms.get(room_id) {
                    let room = entry.value().clone();
                    let mut guard = room.try_write().expect("replay: uncontended write");
                    self.mark_confirmed(&mut guard, *reservation_id);
                }
            }
            Event::ReservationCancelled {
                reservation_id,
                room_id,
                exam_id,
            } => {
                if let Some(entry) = self.rooms.get(room_id) {
                    let room = entry.value().clone();
                    let mut guard = room.try_write().expect("replay: uncontended write");
                    self.detach_reservation(&mut guard, *reservation_id);
                }
                self.refresh_exam_status(*exam_id);
            }
        }
    }

    /// Write a record to the WAL via the background group-commit writer.
    /// Nothing is applied in memory until this returns Ok.
    pub(super) async fn wal_append(&self, record: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                record: record.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_of_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_room
            .get(reservation_id)
            .map(|e| *e.value())
    }

    // ── In-memory application (caller holds the room's write lock) ──

    pub(super) fn attach_placement(
        &self,
        room: &mut RoomState,
        exam_id: Ulid,
        placement: &Placement,
    ) {
        room.insert_reservation(Reservation {
            id: placement.reservation_id,
            exam_id,
            date: placement.date,
            ordinals: placement.ordinals.clone(),
            confirmed: false,
        });
        self.reservation_to_room
            .insert(placement.reservation_id, placement.room_id);
        self.exam_reservations
            .entry(exam_id)
            .or_default()
            .push(placement.reservation_id);
    }

    pub(super) fn detach_reservation(
        &self,
        room: &mut RoomState,
        reservation_id: Ulid,
    ) -> Option<Reservation> {
        let removed = room.remove_reservation(reservation_id)?;
        self.reservation_to_room.remove(&reservation_id);
        if let Some(mut live) = self.exam_reservations.get_mut(&removed.exam_id) {
            live.retain(|id| *id != reservation_id);
        }
        Some(removed)
    }

    pub(super) fn mark_confirmed(&self, room: &mut RoomState, reservation_id: Ulid) {
        if let Some(reservation) = room
            .reservations
            .iter_mut()
            .find(|r| r.id == reservation_id)
        {
            reservation.confirmed = true;
        }
    }

    /// Recompute an exam's status from its live placements. Called after
    /// every commit that touches the exam's reservations.
    pub(super) fn refresh_exam_status(&self, exam_id: Ulid) {
        let scheduled = self
            .exam_reservations
            .get(&exam_id)
            .is_some_and(|live| !live.is_empty());
        if let Some(mut exam) = self.exams.get_mut(&exam_id) {
            exam.status = if scheduled {
                ExamStatus::Scheduled
            } else {
                ExamStatus::Unscheduled
            };
        }
    }
}
