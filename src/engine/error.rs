use ulid::Ulid;

use crate::selection::SelectionError;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Write-time conflict: `ordinal` is already held by `reservation` for
    /// the same room and date.
    SlotTaken { reservation: Ulid, ordinal: u16 },
    /// Structural rule violation in the candidate block.
    Selection(SelectionError),
    /// Room or exam still referenced by live reservations.
    HasReservations(Ulid),
    /// Module definition breaking the dense, monotonic grid.
    GridOrder(&'static str),
    LimitExceeded(&'static str),
    /// Exam status contradicts its live placements. Indicates a bug in the
    /// atomic write path, never a normal business condition.
    Inconsistent { exam: Ulid, detail: &'static str },
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::SlotTaken {
                reservation,
                ordinal,
            } => write!(
                f,
                "room unavailable: module {ordinal} already reserved by {reservation}"
            ),
            EngineError::Selection(e) => write!(f, "invalid selection: {e}"),
            EngineError::HasReservations(id) => {
                write!(f, "cannot delete {id}: has reservations")
            }
            EngineError::GridOrder(msg) => write!(f, "module grid: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Inconsistent { exam, detail } => {
                write!(f, "inconsistent state for exam {exam}: {detail}")
            }
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
