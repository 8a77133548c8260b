//! Hard limits. Every bound a client could push against lives here so the
//! rejection paths are greppable in one place.

use crate::model::Ms;

/// How long a checkout hold keeps capacity before lapsing: 15 minutes.
pub const HOLD_TTL_MS: Ms = 15 * 60 * 1000;

/// Platform commission in basis points unless overridden (15%).
pub const DEFAULT_COMMISSION_BPS: i64 = 1500;

pub const MAX_SLOTS_PER_TENANT: usize = 100_000;

/// Holds + booking entries combined, per slot.
pub const MAX_ENTRIES_PER_SLOT: usize = 10_000;

/// Children per slot; also bounds reserved spots per hold.
pub const MAX_CAPACITY: u32 = 1_000;

/// Cents per hour ($10,000/hour). Caps `rate * duration` far below i64
/// overflow even over the widest allowed span.
pub const MAX_RATE: i64 = 1_000_000;

pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_ADDRESS_LEN: usize = 500;
pub const MAX_RECURRENCE_LEN: usize = 200;

/// A slot or booking window may cover at most 7 days.
pub const MAX_SPAN_DURATION_MS: Ms = 7 * 24 * 3_600_000;

/// Availability queries may scan at most 1 year.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;

/// 2000-01-01T00:00:00Z — anything earlier is a client bug.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

pub const MAX_TENANTS: usize = 64;
pub const MAX_TENANT_NAME_LEN: usize = 256;
