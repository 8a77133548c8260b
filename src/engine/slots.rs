use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{now_ms, validate_span, Actor, Engine, EngineError};

/// Field-wise slot update. `None` leaves the field as is.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SlotUpdate {
    pub span: Option<Span>,
    pub total_capacity: Option<u32>,
    pub base_rate: Option<i64>,
    pub current_rate: Option<i64>,
    pub status: Option<SlotStatus>,
    pub recurrence: Option<String>,
    pub notes: Option<String>,
}

fn validate_capacity(capacity: u32) -> Result<(), EngineError> {
    if capacity == 0 || capacity > MAX_CAPACITY {
        return Err(EngineError::LimitExceeded("capacity out of range"));
    }
    Ok(())
}

pub(super) fn validate_rate(rate: i64) -> Result<(), EngineError> {
    if rate <= 0 || rate > MAX_RATE {
        return Err(EngineError::LimitExceeded("rate out of range"));
    }
    Ok(())
}

fn validate_text(
    recurrence: Option<&String>,
    notes: Option<&String>,
) -> Result<(), EngineError> {
    if recurrence.is_some_and(|r| r.len() > MAX_RECURRENCE_LEN) {
        return Err(EngineError::LimitExceeded("recurrence too long"));
    }
    if notes.is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}

impl Engine {
    /// Publish a new availability slot for a caregiver.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_slot(
        &self,
        actor: &Actor,
        id: Ulid,
        caregiver_id: Ulid,
        span: Span,
        total_capacity: u32,
        base_rate: i64,
        recurrence: Option<String>,
        notes: Option<String>,
    ) -> Result<(), EngineError> {
        if !actor.can_act_for_caregiver(caregiver_id) {
            return Err(EngineError::Forbidden("only the caregiver can publish slots"));
        }
        validate_span(&span)?;
        validate_capacity(total_capacity)?;
        validate_rate(base_rate)?;
        validate_text(recurrence.as_ref(), notes.as_ref())?;
        if self.slots.len() >= MAX_SLOTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many slots"));
        }

        let event = Event::SlotCreated {
            id,
            caregiver_id,
            span,
            total_capacity,
            base_rate,
            recurrence: recurrence.clone(),
            notes: notes.clone(),
        };
        let slot = SlotState::new(id, caregiver_id, span, total_capacity, base_rate, recurrence, notes);

        // Claim the id before the WAL write; entry() makes the duplicate
        // check and the insert one atomic step, so concurrent creates with
        // the same id race to a single winner.
        match self.slots.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(RwLock::new(slot)));
            }
        }
        if let Err(e) = self.wal_append(&event).await {
            self.slots.remove(&id);
            return Err(e);
        }
        self.caregiver_slots.entry(caregiver_id).or_default().push(id);
        self.notify.send_slot(id, caregiver_id, &event);
        tracing::debug!(slot_id = %id, caregiver_id = %caregiver_id, "slot created");
        Ok(())
    }

    /// Update a slot's window, capacity, rates, status, or metadata.
    /// Capacity can never shrink below what confirmed bookings already use.
    pub async fn update_slot(
        &self,
        actor: &Actor,
        id: Ulid,
        update: SlotUpdate,
    ) -> Result<(), EngineError> {
        let slot = self.get_slot(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = slot.write().await;

        if !actor.can_act_for_caregiver(guard.caregiver_id) {
            return Err(EngineError::NotOwner(id));
        }

        let span = update.span.unwrap_or(guard.span);
        validate_span(&span)?;
        let total_capacity = update.total_capacity.unwrap_or(guard.total_capacity);
        validate_capacity(total_capacity)?;
        let base_rate = update.base_rate.unwrap_or(guard.base_rate);
        let current_rate = update.current_rate.unwrap_or(guard.current_rate);
        validate_rate(base_rate)?;
        validate_rate(current_rate)?;
        validate_text(update.recurrence.as_ref(), update.notes.as_ref())?;

        let occupancy = self.derived_occupancy(&guard);
        if total_capacity < occupancy {
            return Err(EngineError::InsufficientCapacity {
                slot_id: id,
                requested: total_capacity,
                available: occupancy,
            });
        }

        let event = Event::SlotUpdated {
            id,
            span,
            total_capacity,
            base_rate,
            current_rate,
            status: update.status.unwrap_or(guard.status),
            recurrence: update.recurrence.or_else(|| guard.recurrence.clone()),
            notes: update.notes.or_else(|| guard.notes.clone()),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        // Capacity or status may have changed; counters follow.
        self.recalc_locked(&mut guard);
        Ok(())
    }

    /// Available slots whose window has fully passed. Best-effort snapshot;
    /// callers pass the result to `mark_slot_expired` one by one.
    pub fn collect_past_slots(&self, now: Ms) -> Vec<Ulid> {
        let mut past = Vec::new();
        for entry in self.slots.iter() {
            let Ok(guard) = entry.value().try_read() else {
                continue;
            };
            if guard.status == SlotStatus::Available && guard.span.end <= now {
                past.push(guard.id);
            }
        }
        past
    }

    /// Stamp a past slot Expired. Returns false if the slot closed, filled,
    /// or moved its window between collection and stamping. Booked slots are
    /// left as they are; Expired marks only the unsold remainder.
    pub async fn mark_slot_expired(&self, id: Ulid, now: Ms) -> Result<bool, EngineError> {
        let slot = self.get_slot(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = slot.write().await;
        if guard.status != SlotStatus::Available || guard.span.end > now {
            return Ok(false);
        }
        let event = Event::SlotUpdated {
            id,
            span: guard.span,
            total_capacity: guard.total_capacity,
            base_rate: guard.base_rate,
            current_rate: guard.current_rate,
            status: SlotStatus::Expired,
            recurrence: guard.recurrence.clone(),
            notes: guard.notes.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(true)
    }

    /// Withdraw a slot entirely. Refused while any booking entry references
    /// it — cancelled ones included, the junction row is the audit trail —
    /// or a live hold claims spots; let holds lapse first.
    pub async fn delete_slot(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        let slot = self.get_slot(&id).ok_or(EngineError::NotFound(id))?;
        let guard = slot.write().await;

        if !actor.can_act_for_caregiver(guard.caregiver_id) {
            return Err(EngineError::NotOwner(id));
        }
        let now = now_ms();
        if !guard.entries.is_empty() || guard.held_spots(now) > 0 {
            return Err(EngineError::HasDependents(id));
        }

        let event = Event::SlotDeleted { id };
        self.wal_append(&event).await?;

        for hold in &guard.holds {
            self.hold_to_slot.remove(&hold.id);
        }
        if let Some(mut ids) = self.caregiver_slots.get_mut(&guard.caregiver_id) {
            ids.retain(|s| *s != id);
        }
        let caregiver_id = guard.caregiver_id;
        drop(guard);
        self.slots.remove(&id);
        self.notify.send_slot(id, caregiver_id, &event);
        self.notify.remove(&id);
        tracing::debug!(slot_id = %id, "slot deleted");
        Ok(())
    }
}
