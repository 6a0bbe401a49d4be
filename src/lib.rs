//! aulario — an exam-scheduling reservation engine.
//!
//! Rooms × daily time modules × calendar dates, allocated to exams with
//! non-overlap and contiguity enforced, committed atomically through a
//! write-ahead log, and served to any Postgres client over the wire protocol.

pub mod auth;
pub mod compactor;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod selection;
pub mod sql;
pub mod tenant;
pub mod tls;
pub mod wal;
pub mod wire;
