use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{now_ms, Actor, Engine, EngineError};

impl Engine {
    /// Place a 15-minute hold on `children_count` spots in a slot. The
    /// check-and-commit runs under the slot's write lock, so two parents
    /// racing for the last spot serialize here and the loser gets
    /// InsufficientCapacity.
    pub async fn reserve_spots(
        &self,
        actor: &Actor,
        hold_id: Ulid,
        slot_id: Ulid,
        children_count: u32,
        reserved_spots: u32,
    ) -> Result<Ms, EngineError> {
        let parent_id = actor.require_parent("only parents reserve spots")?;
        if children_count == 0 || children_count > MAX_CAPACITY {
            return Err(EngineError::LimitExceeded("children_count out of range"));
        }
        if reserved_spots == 0 || reserved_spots > MAX_CAPACITY {
            return Err(EngineError::LimitExceeded("reserved_spots out of range"));
        }
        // Claim the hold id up front; entry() makes the duplicate check and
        // the index insert one atomic step. Released again on any failure
        // below, so a rejected reserve doesn't burn the id.
        match self.hold_to_slot.entry(hold_id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(hold_id)),
            Entry::Vacant(vacant) => {
                vacant.insert(slot_id);
            }
        }
        let placed = self
            .place_hold(parent_id, hold_id, slot_id, children_count, reserved_spots)
            .await;
        if placed.is_err() {
            self.hold_to_slot.remove(&hold_id);
        }
        placed
    }

    async fn place_hold(
        &self,
        parent_id: Ulid,
        hold_id: Ulid,
        slot_id: Ulid,
        children_count: u32,
        reserved_spots: u32,
    ) -> Result<Ms, EngineError> {
        let slot = self.get_slot(&slot_id).ok_or(EngineError::NotFound(slot_id))?;
        let mut guard = slot.write().await;

        let now = now_ms();
        if !guard.status.is_open() || guard.span.end <= now {
            return Err(EngineError::SlotClosed(slot_id));
        }
        if guard.holds.len() >= MAX_ENTRIES_PER_SLOT {
            return Err(EngineError::LimitExceeded("too many holds on slot"));
        }

        let available = guard.effective_available(now);
        if reserved_spots > available {
            return Err(EngineError::InsufficientCapacity {
                slot_id,
                requested: reserved_spots,
                available,
            });
        }

        let expires_at = now + HOLD_TTL_MS;
        let event = Event::HoldPlaced {
            id: hold_id,
            slot_id,
            parent_id,
            children_count,
            reserved_spots,
            expires_at,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::debug!(hold_id = %hold_id, slot_id = %slot_id, reserved_spots, "hold placed");
        Ok(expires_at)
    }

    /// Release a hold before it expires. Idempotent: any stored status other
    /// than Active is a no-op success (retried cancels, lapsed holds, holds
    /// already converted to a booking).
    pub async fn cancel_reservation(
        &self,
        actor: &Actor,
        hold_id: Ulid,
    ) -> Result<(), EngineError> {
        let (slot_id, mut guard) = self.resolve_hold_write(&hold_id).await?;

        let hold = guard.hold(hold_id).ok_or(EngineError::NotFound(hold_id))?;
        match actor {
            Actor::Parent(id) if *id == hold.parent_id => {}
            Actor::Admin => {}
            Actor::Caregiver(id) if *id == guard.caregiver_id => {}
            _ => return Err(EngineError::NotOwner(hold_id)),
        }

        if hold.status != HoldStatus::Active {
            return Ok(());
        }

        let event = Event::HoldCancelled { id: hold_id, slot_id };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::debug!(hold_id = %hold_id, slot_id = %slot_id, "hold cancelled");
        Ok(())
    }

    /// Scan for holds whose `expires_at` lapsed but which are still stored
    /// Active. Skips slots with contended locks; the next sweep catches them.
    /// Callers pass the result to `mark_hold_expired` one by one.
    pub fn collect_expired_holds(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut expired = Vec::new();
        for entry in self.slots.iter() {
            let Ok(guard) = entry.value().try_read() else {
                continue;
            };
            for hold in &guard.holds {
                if hold.status == HoldStatus::Active && hold.expires_at <= now {
                    expired.push((guard.id, hold.id));
                }
            }
        }
        expired
    }

    /// Stamp a lapsed hold Expired. Re-checks under the lock: the hold may
    /// have been cancelled or converted between the sweep and this call.
    pub async fn mark_hold_expired(
        &self,
        slot_id: Ulid,
        hold_id: Ulid,
        now: Ms,
    ) -> Result<bool, EngineError> {
        let slot = self.get_slot(&slot_id).ok_or(EngineError::NotFound(slot_id))?;
        let mut guard = slot.write().await;

        let still_lapsed = guard
            .hold(hold_id)
            .is_some_and(|h| h.status == HoldStatus::Active && h.expires_at <= now);
        if !still_lapsed {
            return Ok(false);
        }

        let event = Event::HoldExpired { id: hold_id, slot_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(true)
    }
}
