use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minutes since midnight — module boundaries are clock times, not instants.
pub type Minute = u16;

/// One slot of the shared daily grid. Ordinals are dense and 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSlot {
    pub ordinal: u16,
    pub start_min: Minute,
    pub end_min: Minute,
}

/// The ordered, finite set of daily time slots shared by all rooms.
/// Slots are appended at setup time and never mutated by the booking flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleGrid {
    slots: Vec<ModuleSlot>,
}

impl ModuleGrid {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn len(&self) -> u16 {
        self.slots.len() as u16
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[ModuleSlot] {
        &self.slots
    }

    pub fn contains(&self, ordinal: u16) -> bool {
        ordinal >= 1 && ordinal <= self.len()
    }

    /// Clock times for an ordinal, or None when the ordinal is off the grid.
    pub fn time_of(&self, ordinal: u16) -> Option<(Minute, Minute)> {
        self.slots
            .get(ordinal.checked_sub(1)? as usize)
            .map(|s| (s.start_min, s.end_min))
    }

    /// Append the next slot. Caller validates density/monotonicity first;
    /// this only keeps the dense-ordinal representation intact.
    pub fn push(&mut self, slot: ModuleSlot) {
        debug_assert_eq!(slot.ordinal, self.len() + 1, "grid ordinals are dense");
        self.slots.push(slot);
    }
}

/// Scheduling state of an exam. `Scheduled` exactly while at least one
/// committed placement links its required modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExamStatus {
    Unscheduled,
    Scheduled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamState {
    pub id: Ulid,
    /// Subject/section reference, owned by the catalog flow.
    pub subject: String,
    /// Fixed at creation; never changes as a side effect of booking.
    pub modules_required: u16,
    pub status: ExamStatus,
}

/// A not-yet-persisted exam carried into the same commit as its first placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamDraft {
    pub id: Ulid,
    pub subject: String,
    pub modules_required: u16,
}

/// Target exam of a scheduling commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExamRef {
    Existing(Ulid),
    Draft(ExamDraft),
}

impl ExamRef {
    pub fn id(&self) -> Ulid {
        match self {
            ExamRef::Existing(id) => *id,
            ExamRef::Draft(draft) => draft.id,
        }
    }
}

/// The binding of one exam to one room on one date, occupying a sorted
/// contiguous run of module ordinals. The owning room is implicit in where
/// the reservation is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub exam_id: Ulid,
    pub date: NaiveDate,
    /// Sorted; length equals the exam's required module count.
    pub ordinals: Vec<u16>,
    /// Downstream teacher-confirmation flag. Cleared when a reservation moves.
    pub confirmed: bool,
}

impl Reservation {
    pub fn first_ordinal(&self) -> u16 {
        self.ordinals.first().copied().unwrap_or(0)
    }

    pub fn occupies(&self, ordinal: u16) -> bool {
        self.ordinals.binary_search(&ordinal).is_ok()
    }
}

/// One placement inside a scheduling commit: where a reservation lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub reservation_id: Ulid,
    pub room_id: Ulid,
    pub date: NaiveDate,
    pub ordinals: Vec<u16>,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub name: String,
    /// Seats. Reporting metadata only — not a scheduling constraint.
    pub capacity: u32,
    pub building: Option<String>,
    /// All reservations, sorted by (date, first ordinal).
    pub reservations: Vec<Reservation>,
}

impl RoomState {
    pub fn new(id: Ulid, name: String, capacity: u32, building: Option<String>) -> Self {
        Self {
            id,
            name,
            capacity,
            building,
            reservations: Vec::new(),
        }
    }

    /// Insert keeping (date, first ordinal) order.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let key = (reservation.date, reservation.first_ordinal());
        let pos = self
            .reservations
            .partition_point(|r| (r.date, r.first_ordinal()) < key);
        self.reservations.insert(pos, reservation);
    }

    /// Remove a reservation by id.
    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        if let Some(pos) = self.reservations.iter().position(|r| r.id == id) {
            Some(self.reservations.remove(pos))
        } else {
            None
        }
    }

    pub fn get_reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Reservations on one date. Binary search skips other dates entirely.
    pub fn on_date(&self, date: NaiveDate) -> impl Iterator<Item = &Reservation> {
        let lo = self.reservations.partition_point(|r| r.date < date);
        let hi = self.reservations.partition_point(|r| r.date <= date);
        self.reservations[lo..hi].iter()
    }
}

/// WAL record format. One record is one atomic commit unit: everything in it
/// is applied together or, on a torn tail, dropped together at replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: Ulid,
        name: String,
        capacity: u32,
        building: Option<String>,
    },
    RoomUpdated {
        id: Ulid,
        name: String,
        capacity: u32,
        building: Option<String>,
    },
    RoomDeleted {
        id: Ulid,
    },
    ModuleDefined {
        ordinal: u16,
        start_min: Minute,
        end_min: Minute,
    },
    ExamCreated {
        id: Ulid,
        subject: String,
        modules_required: u16,
    },
    ExamDeleted {
        id: Ulid,
    },
    /// One atomic scheduling commit: optionally creates the exam, removes the
    /// exam's superseded reservations, inserts the new placements.
    ExamScheduled {
        exam_id: Ulid,
        new_exam: Option<ExamDraft>,
        replaces: Vec<Ulid>,
        placements: Vec<Placement>,
    },
    ReservationMoved {
        reservation_id: Ulid,
        from_room: Ulid,
        to_room: Ulid,
        date: NaiveDate,
        ordinals: Vec<u16>,
    },
    ReservationConfirmed {
        reservation_id: Ulid,
        room_id: Ulid,
    },
    ReservationCancelled {
        reservation_id: Ulid,
        room_id: Ulid,
        exam_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub building: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationInfo {
    pub id: Ulid,
    pub room_id: Ulid,
    pub exam_id: Ulid,
    pub date: NaiveDate,
    pub ordinals: Vec<u16>,
    pub confirmed: bool,
}

/// One grid cell of the availability answer for a room/date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAvailability {
    pub ordinal: u16,
    pub start_min: Minute,
    pub end_min: Minute,
    pub occupied: bool,
}
