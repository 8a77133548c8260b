use ulid::Ulid;

use crate::model::*;

use super::{now_ms, Actor, Engine, EngineError};

/// WHERE-clause filter for slot reads. `day` bounds are inclusive day
/// numbers (days since epoch, UTC).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SlotFilter {
    pub caregiver_id: Option<Ulid>,
    pub day: Option<i64>,
    pub day_from: Option<i64>,
    pub day_to: Option<i64>,
    pub min_available: Option<u32>,
}

impl SlotFilter {
    fn matches(&self, slot: &SlotState) -> bool {
        if self.caregiver_id.is_some_and(|c| c != slot.caregiver_id) {
            return false;
        }
        let day = slot.day();
        if self.day.is_some_and(|d| d != day) {
            return false;
        }
        if self.day_from.is_some_and(|d| day < d) {
            return false;
        }
        if self.day_to.is_some_and(|d| day > d) {
            return false;
        }
        if self.min_available.is_some_and(|m| slot.available_spots < m) {
            return false;
        }
        true
    }

    fn has_day_bound(&self) -> bool {
        self.day.is_some() || self.day_from.is_some() || self.day_to.is_some()
    }
}

fn slot_info(slot: &SlotState) -> SlotInfo {
    SlotInfo {
        id: slot.id,
        caregiver_id: slot.caregiver_id,
        day: slot.day(),
        start: slot.span.start,
        end: slot.span.end,
        total_capacity: slot.total_capacity,
        current_occupancy: slot.current_occupancy,
        available_spots: slot.available_spots,
        base_rate: slot.base_rate,
        current_rate: slot.current_rate,
        status: slot.status,
    }
}

impl Engine {
    fn collect_slots<F>(&self, filter: &SlotFilter, keep: F) -> Vec<SlotInfo>
    where
        F: Fn(&SlotState) -> bool,
    {
        let mut out: Vec<SlotInfo> = self
            .slots
            .iter()
            .filter_map(|entry| {
                let guard = entry.value().try_read().ok()?;
                (filter.matches(&guard) && keep(&guard)).then(|| slot_info(&guard))
            })
            .collect();
        out.sort_by_key(|s| (s.day, s.start, s.id));
        out
    }

    /// All slots matching the filter, whatever their status. Calendar view.
    pub fn query_slots(&self, filter: &SlotFilter) -> Vec<SlotInfo> {
        self.collect_slots(filter, |_| true)
    }

    /// Bookable slots: open spots per the stored counter, status Available,
    /// and — unless the caller pinned a day — not already started.
    pub fn available_slots(&self, filter: &SlotFilter) -> Vec<SlotInfo> {
        let now = now_ms();
        let unbounded = !filter.has_day_bound();
        self.collect_slots(filter, |slot| {
            slot.available_spots > 0
                && slot.status == SlotStatus::Available
                && (!unbounded || slot.span.start >= now)
        })
    }

    /// Live capacity for one caregiver's day, holds included. This is what
    /// checkout UIs poll: `realtime_available` dips while a hold is live and
    /// recovers the instant it lapses, no sweep needed.
    pub fn realtime_availability(&self, caregiver_id: Ulid, day: i64) -> RealtimeAvailability {
        let now = now_ms();
        let ids = self
            .caregiver_slots
            .get(&caregiver_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        let mut slots = Vec::new();
        for slot_id in ids {
            let Some(slot) = self.get_slot(&slot_id) else { continue };
            let Ok(guard) = slot.try_read() else { continue };
            if guard.day() != day || !guard.status.is_open() {
                continue;
            }
            slots.push(RealtimeSlot {
                slot_id,
                start: guard.span.start,
                end: guard.span.end,
                available_spots: guard.available_spots,
                realtime_available: guard.effective_available(now),
            });
        }
        slots.sort_by_key(|s| (s.start, s.slot_id));

        let total_slots_available = slots.iter().filter(|s| s.realtime_available > 0).count();
        let total_spots_available = slots.iter().map(|s| s.realtime_available).sum();
        RealtimeAvailability {
            slots,
            total_slots_available,
            total_spots_available,
        }
    }

    /// Holds on one slot. The owning caregiver and admins see all of them;
    /// a parent sees only their own.
    pub async fn get_reservations(
        &self,
        actor: &Actor,
        slot_id: Ulid,
    ) -> Result<Vec<HoldInfo>, EngineError> {
        let slot = self.get_slot(&slot_id).ok_or(EngineError::NotFound(slot_id))?;
        let guard = slot.read().await;

        let visible = |h: &Hold| match actor {
            Actor::Admin => true,
            Actor::Caregiver(cid) => *cid == guard.caregiver_id,
            Actor::Parent(pid) => *pid == h.parent_id,
        };

        Ok(guard
            .holds
            .iter()
            .filter(|h| visible(h))
            .map(|h| HoldInfo {
                id: h.id,
                slot_id,
                parent_id: h.parent_id,
                children_count: h.children_count,
                reserved_spots: h.reserved_spots,
                status: h.status,
                expires_at: h.expires_at,
            })
            .collect())
    }

    /// Bookings, scoped to what the actor may see: admins everything
    /// (optionally narrowed to one caregiver), caregivers their own book of
    /// business, parents their own purchases.
    pub fn get_bookings(
        &self,
        actor: &Actor,
        caregiver_id: Option<Ulid>,
    ) -> Result<Vec<BookingInfo>, EngineError> {
        let visible = |b: &Booking| match actor {
            Actor::Admin => caregiver_id.is_none_or(|c| c == b.caregiver_id),
            Actor::Caregiver(cid) => {
                b.caregiver_id == *cid && caregiver_id.is_none_or(|c| c == *cid)
            }
            Actor::Parent(pid) => {
                b.parent_id == *pid && caregiver_id.is_none_or(|c| c == b.caregiver_id)
            }
        };

        let mut out: Vec<BookingInfo> = self
            .bookings
            .iter()
            .filter(|e| visible(e.value()))
            .map(|e| {
                let b = e.value();
                BookingInfo {
                    id: b.id,
                    parent_id: b.parent_id,
                    caregiver_id: b.caregiver_id,
                    start: b.span.start,
                    end: b.span.end,
                    children_count: b.children_count,
                    status: b.status,
                    total_amount: b.pricing.total_amount,
                    platform_fee: b.pricing.platform_fee,
                }
            })
            .collect();
        out.sort_by_key(|b| (b.start, b.id));
        Ok(out)
    }
}
