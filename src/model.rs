use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

pub const MS_PER_HOUR: Ms = 3_600_000;
pub const MS_PER_DAY: Ms = 86_400_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Day number (days since epoch, UTC) the span starts on.
    pub fn day(&self) -> i64 {
        self.start.div_euclid(MS_PER_DAY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotStatus {
    Available,
    Booked,
    Cancelled,
    Expired,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Available => "available",
            SlotStatus::Booked => "booked",
            SlotStatus::Cancelled => "cancelled",
            SlotStatus::Expired => "expired",
        }
    }

    /// True when the slot can accept new holds or bookings.
    pub fn is_open(&self) -> bool {
        matches!(self, SlotStatus::Available | SlotStatus::Booked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldStatus {
    Active,
    Expired,
    Converted,
    Cancelled,
}

impl HoldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldStatus::Active => "active",
            HoldStatus::Expired => "expired",
            HoldStatus::Converted => "converted",
            HoldStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

/// A time-boxed soft hold on spots within a slot, placed during checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    pub id: Ulid,
    pub parent_id: Ulid,
    pub children_count: u32,
    pub reserved_spots: u32,
    pub status: HoldStatus,
    pub expires_at: Ms,
}

impl Hold {
    /// Whether this hold still counts against capacity at `now`.
    ///
    /// Pull expiry semantics: a lapsed `expires_at` stops the hold from
    /// counting even while its stored status is still `Active` — the sweep
    /// that stamps `Expired` is an optimization, not the mechanism.
    pub fn holds_capacity(&self, now: Ms) -> bool {
        self.status == HoldStatus::Active && self.expires_at > now
    }
}

/// Junction row recording how much of a slot's capacity a booking consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotEntry {
    pub booking_id: Ulid,
    pub children_count: u32,
    pub spots_used: u32,
    /// Cents per hour at materialization time.
    pub rate_applied: i64,
}

/// Pricing breakdown, integer cents throughout. The platform fee is
/// subtractive: the parent pays `total_amount` (== `subtotal`) and the
/// caregiver receives `caregiver_payout` (== `subtotal - platform_fee`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    pub hourly_rate: i64,
    pub subtotal: i64,
    pub platform_fee: i64,
    pub total_amount: i64,
    pub caregiver_payout: i64,
}

impl Pricing {
    /// Price a window at `hourly_rate` cents/hour with the fee carved out at
    /// `commission_bps` basis points. Both divisions round half-up.
    pub fn compute(hourly_rate: i64, duration_ms: Ms, commission_bps: i64) -> Self {
        let subtotal = (hourly_rate * duration_ms + MS_PER_HOUR / 2) / MS_PER_HOUR;
        let platform_fee = (subtotal * commission_bps + 5_000) / 10_000;
        Self {
            hourly_rate,
            subtotal,
            platform_fee,
            total_amount: subtotal,
            caregiver_payout: subtotal - platform_fee,
        }
    }
}

/// The durable commercial record of a confirmed engagement, independent of
/// whether it originated from a slot or an ad-hoc request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub parent_id: Ulid,
    pub caregiver_id: Ulid,
    pub span: Span,
    pub children_count: u32,
    pub address: Option<String>,
    pub pricing: Pricing,
    pub status: BookingStatus,
    pub created_at: Ms,
    pub confirmed_at: Option<Ms>,
    pub started_at: Option<Ms>,
    pub completed_at: Option<Ms>,
    pub cancelled_at: Option<Ms>,
}

impl Booking {
    /// Record a status transition with its timestamp.
    pub fn transition(&mut self, status: BookingStatus, at: Ms) {
        self.status = status;
        match status {
            BookingStatus::Pending => {}
            BookingStatus::Confirmed => self.confirmed_at = Some(at),
            BookingStatus::InProgress => self.started_at = Some(at),
            BookingStatus::Completed => self.completed_at = Some(at),
            BookingStatus::Cancelled => self.cancelled_at = Some(at),
        }
    }
}

/// One offered time window for one caregiver, plus the junction rows that
/// consume its capacity. The slot is the single serialization point for all
/// capacity decisions about it.
#[derive(Debug, Clone)]
pub struct SlotState {
    pub id: Ulid,
    pub caregiver_id: Ulid,
    pub span: Span,
    pub total_capacity: u32,
    /// Denormalized: spots consumed by non-cancelled bookings. Written only
    /// by the engine's recalc path, which re-derives it from `entries`.
    pub current_occupancy: u32,
    /// Denormalized: `total_capacity - current_occupancy`.
    pub available_spots: u32,
    /// Cents per hour as published.
    pub base_rate: i64,
    /// Cents per hour actually charged (diverges under dynamic pricing).
    pub current_rate: i64,
    pub status: SlotStatus,
    pub recurrence: Option<String>,
    pub notes: Option<String>,
    pub holds: Vec<Hold>,
    pub entries: Vec<SlotEntry>,
}

impl SlotState {
    pub fn new(
        id: Ulid,
        caregiver_id: Ulid,
        span: Span,
        total_capacity: u32,
        base_rate: i64,
        recurrence: Option<String>,
        notes: Option<String>,
    ) -> Self {
        Self {
            id,
            caregiver_id,
            span,
            total_capacity,
            current_occupancy: 0,
            available_spots: total_capacity,
            base_rate,
            current_rate: base_rate,
            status: SlotStatus::Available,
            recurrence,
            notes,
            holds: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub fn day(&self) -> i64 {
        self.span.day()
    }

    pub fn hold(&self, id: Ulid) -> Option<&Hold> {
        self.holds.iter().find(|h| h.id == id)
    }

    pub fn hold_mut(&mut self, id: Ulid) -> Option<&mut Hold> {
        self.holds.iter_mut().find(|h| h.id == id)
    }

    pub fn entry(&self, booking_id: Ulid) -> Option<&SlotEntry> {
        self.entries.iter().find(|e| e.booking_id == booking_id)
    }

    /// Spots currently claimed by active, unexpired holds.
    pub fn held_spots(&self, now: Ms) -> u32 {
        self.holds
            .iter()
            .filter(|h| h.holds_capacity(now))
            .map(|h| h.reserved_spots)
            .sum()
    }

    /// Spots a new parent could still reserve right now:
    /// `total - occupancy - active holds`. Every capacity check uses this;
    /// the persisted `available_spots` only accounts for confirmed bookings.
    pub fn effective_available(&self, now: Ms) -> u32 {
        self.total_capacity
            .saturating_sub(self.current_occupancy)
            .saturating_sub(self.held_spots(now))
    }

    /// Overwrite the denormalized counters from a derived occupancy figure
    /// and re-derive the Booked/Available status. Explicit Cancelled/Expired
    /// states are never overwritten here.
    pub fn set_counters(&mut self, occupancy: u32) {
        let occupancy = occupancy.min(self.total_capacity);
        self.current_occupancy = occupancy;
        self.available_spots = self.total_capacity - occupancy;
        if self.status.is_open() {
            self.status = if self.available_spots == 0 && self.total_capacity > 0 {
                SlotStatus::Booked
            } else {
                SlotStatus::Available
            };
        }
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SlotCreated {
        id: Ulid,
        caregiver_id: Ulid,
        span: Span,
        total_capacity: u32,
        base_rate: i64,
        recurrence: Option<String>,
        notes: Option<String>,
    },
    SlotUpdated {
        id: Ulid,
        span: Span,
        total_capacity: u32,
        base_rate: i64,
        current_rate: i64,
        status: SlotStatus,
        recurrence: Option<String>,
        notes: Option<String>,
    },
    SlotDeleted {
        id: Ulid,
    },
    HoldPlaced {
        id: Ulid,
        slot_id: Ulid,
        parent_id: Ulid,
        children_count: u32,
        reserved_spots: u32,
        expires_at: Ms,
    },
    HoldCancelled {
        id: Ulid,
        slot_id: Ulid,
    },
    HoldExpired {
        id: Ulid,
        slot_id: Ulid,
    },
    HoldConverted {
        id: Ulid,
        slot_id: Ulid,
        booking_id: Ulid,
    },
    BookingCreated {
        id: Ulid,
        parent_id: Ulid,
        caregiver_id: Ulid,
        span: Span,
        children_count: u32,
        address: Option<String>,
        pricing: Pricing,
        status: BookingStatus,
        at: Ms,
    },
    BookingStatusChanged {
        id: Ulid,
        status: BookingStatus,
        at: Ms,
    },
    EntryAdded {
        slot_id: Ulid,
        booking_id: Ulid,
        children_count: u32,
        spots_used: u32,
        rate_applied: i64,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub id: Ulid,
    pub caregiver_id: Ulid,
    pub day: i64,
    pub start: Ms,
    pub end: Ms,
    pub total_capacity: u32,
    pub current_occupancy: u32,
    pub available_spots: u32,
    pub base_rate: i64,
    pub current_rate: i64,
    pub status: SlotStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldInfo {
    pub id: Ulid,
    pub slot_id: Ulid,
    pub parent_id: Ulid,
    pub children_count: u32,
    pub reserved_spots: u32,
    pub status: HoldStatus,
    pub expires_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub parent_id: Ulid,
    pub caregiver_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub children_count: u32,
    pub status: BookingStatus,
    pub total_amount: i64,
    pub platform_fee: i64,
}

/// Per-slot realtime capacity as the UI polls it during checkout windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeSlot {
    pub slot_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub available_spots: u32,
    pub realtime_available: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeAvailability {
    pub slots: Vec<RealtimeSlot>,
    pub total_slots_available: usize,
    pub total_spots_available: u32,
}

/// One drifted slot as reported by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftReport {
    pub slot_id: Ulid,
    pub caregiver_id: Ulid,
    pub stored_occupancy: u32,
    pub actual_occupancy: u32,
    pub stored_available: u32,
    pub expected_available: u32,
}
