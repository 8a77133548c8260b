use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Malformed time window: end at or before start.
    InvalidRange {
        start: i64,
        end: i64,
    },
    /// Caller does not own the caregiver resource being mutated.
    NotOwner(Ulid),
    /// Role mismatch for the attempted operation.
    Forbidden(&'static str),
    /// Requested spots exceed effective availability at commit time.
    InsufficientCapacity {
        slot_id: Ulid,
        requested: u32,
        available: u32,
    },
    /// Delete blocked by existing bookings or active reservations.
    HasDependents(Ulid),
    /// Slot is cancelled or expired and accepts no new holds or bookings.
    SlotClosed(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidRange { start, end } => {
                write!(f, "invalid range: end {end} must be after start {start}")
            }
            EngineError::NotOwner(id) => write!(f, "caller does not own slot {id}"),
            EngineError::Forbidden(op) => write!(f, "forbidden: {op}"),
            EngineError::InsufficientCapacity {
                slot_id,
                requested,
                available,
            } => write!(
                f,
                "insufficient capacity on slot {slot_id}: requested {requested}, available {available}"
            ),
            EngineError::HasDependents(id) => {
                write!(f, "cannot delete slot {id}: bookings or active reservations exist")
            }
            EngineError::SlotClosed(id) => write!(f, "slot {id} is cancelled or expired"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
