//! Hard bounds on engine state. All are generous for a single institution;
//! they exist to keep a misbehaving client from growing a tenant without bound.

pub const MAX_ROOMS_PER_TENANT: usize = 10_000;
pub const MAX_EXAMS_PER_TENANT: usize = 200_000;
pub const MAX_RESERVATIONS_PER_ROOM: usize = 100_000;

/// Daily grids top out well below this everywhere we know of.
pub const MAX_MODULES_PER_GRID: u16 = 64;

/// Largest placement batch accepted in one scheduling commit.
pub const MAX_BATCH_SIZE: usize = 64;

/// Largest contiguous block one exam may require.
pub const MAX_MODULES_PER_EXAM: u16 = 16;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_SUBJECT_LEN: usize = 256;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;
