//! Default constants for the loader and dependency tables.

/// Buckets per loader table index (a prime, so shifted addresses spread well).
pub const DEFAULT_LOADER_TABLE_BUCKETS: usize = 2053;

/// Compare-and-set attempts when forcing an invocation counter to zero.
pub const DEFAULT_COUNTER_NUDGE_RETRIES: u32 = 8;

/// Low bits of loader and chain handles that are always zero (8-byte alignment).
pub const HANDLE_ALIGNMENT_SHIFT: u32 = 3;
