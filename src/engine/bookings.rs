use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{now_ms, validate_span, Actor, Engine, EngineError};

impl Engine {
    /// Create an ad-hoc booking with no slot attachment (the orphan class).
    /// Arrives Pending from checkout, or Confirmed when the payment already
    /// went through.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_direct_booking(
        &self,
        actor: &Actor,
        id: Ulid,
        caregiver_id: Ulid,
        span: Span,
        children_count: u32,
        hourly_rate: i64,
        address: Option<String>,
        confirmed: bool,
    ) -> Result<(), EngineError> {
        let parent_id = actor.require_parent("only parents create bookings")?;
        validate_span(&span)?;
        if children_count == 0 || children_count > MAX_CAPACITY {
            return Err(EngineError::LimitExceeded("children_count out of range"));
        }
        super::slots::validate_rate(hourly_rate)?;
        if address.as_ref().is_some_and(|a| a.len() > MAX_ADDRESS_LEN) {
            return Err(EngineError::LimitExceeded("address too long"));
        }
        if self.bookings.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let now = now_ms();
        let pricing = Pricing::compute(hourly_rate, span.duration_ms(), self.commission_bps);
        let status = if confirmed {
            BookingStatus::Confirmed
        } else {
            BookingStatus::Pending
        };
        let event = Event::BookingCreated {
            id,
            parent_id,
            caregiver_id,
            span,
            children_count,
            address: address.clone(),
            pricing,
            status,
            at: now,
        };
        self.wal_append(&event).await?;

        let mut booking = Booking {
            id,
            parent_id,
            caregiver_id,
            span,
            children_count,
            address,
            pricing,
            status: BookingStatus::Pending,
            created_at: now,
            confirmed_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
        };
        if confirmed {
            booking.transition(BookingStatus::Confirmed, now);
        }
        self.bookings.insert(id, booking);
        self.notify.send(caregiver_id, &event);
        tracing::debug!(booking_id = %id, caregiver_id = %caregiver_id, "direct booking created");
        Ok(())
    }

    /// Materialize a booking out of a slot, atomically consuming capacity.
    ///
    /// Under the slot's write lock: re-check capacity excluding the hold
    /// being converted, create the Confirmed booking priced at the slot's
    /// current rate over the slot span, attach the junction entry, mark the
    /// hold Converted, and recalc the counters. A parent whose hold lapsed
    /// can still book if the room is genuinely there.
    pub async fn create_slot_booking(
        &self,
        actor: &Actor,
        id: Ulid,
        slot_id: Ulid,
        children_count: u32,
        address: Option<String>,
        reservation_id: Option<Ulid>,
    ) -> Result<(), EngineError> {
        let parent_id = actor.require_parent("only parents create bookings")?;
        if children_count == 0 || children_count > MAX_CAPACITY {
            return Err(EngineError::LimitExceeded("children_count out of range"));
        }
        if address.as_ref().is_some_and(|a| a.len() > MAX_ADDRESS_LEN) {
            return Err(EngineError::LimitExceeded("address too long"));
        }
        if self.bookings.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let slot = self.get_slot(&slot_id).ok_or(EngineError::NotFound(slot_id))?;
        let mut guard = slot.write().await;

        let now = now_ms();
        if !guard.status.is_open() {
            return Err(EngineError::SlotClosed(slot_id));
        }

        if let Some(hold_id) = reservation_id {
            let hold = guard.hold(hold_id).ok_or(EngineError::NotFound(hold_id))?;
            if hold.parent_id != parent_id {
                return Err(EngineError::NotOwner(hold_id));
            }
            if hold.status != HoldStatus::Active {
                return Err(EngineError::Forbidden("hold is no longer active"));
            }
        }

        // Capacity re-check, NOT trusting the hold: count every other active
        // unexpired hold so a racing parent's claim is respected, but exclude
        // the converting hold so a parent never competes with their own.
        let held_by_others: u32 = guard
            .holds
            .iter()
            .filter(|h| h.holds_capacity(now) && Some(h.id) != reservation_id)
            .map(|h| h.reserved_spots)
            .sum();
        let occupancy = self.derived_occupancy(&guard);
        let available = guard
            .total_capacity
            .saturating_sub(occupancy)
            .saturating_sub(held_by_others);
        if children_count > available {
            return Err(EngineError::InsufficientCapacity {
                slot_id,
                requested: children_count,
                available,
            });
        }

        let rate = guard.current_rate;
        let pricing = Pricing::compute(rate, guard.span.duration_ms(), self.commission_bps);
        let caregiver_id = guard.caregiver_id;

        let created = Event::BookingCreated {
            id,
            parent_id,
            caregiver_id,
            span: guard.span,
            children_count,
            address: address.clone(),
            pricing,
            status: BookingStatus::Confirmed,
            at: now,
        };
        self.wal_append(&created).await?;
        let mut booking = Booking {
            id,
            parent_id,
            caregiver_id,
            span: guard.span,
            children_count,
            address,
            pricing,
            status: BookingStatus::Pending,
            created_at: now,
            confirmed_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
        };
        booking.transition(BookingStatus::Confirmed, now);
        self.bookings.insert(id, booking);
        self.notify.send(caregiver_id, &created);

        let entry = Event::EntryAdded {
            slot_id,
            booking_id: id,
            children_count,
            spots_used: children_count,
            rate_applied: rate,
        };
        self.persist_and_apply(&mut guard, &entry).await?;
        self.booking_slots.entry(id).or_default().push(slot_id);

        if let Some(hold_id) = reservation_id {
            let converted = Event::HoldConverted {
                id: hold_id,
                slot_id,
                booking_id: id,
            };
            self.persist_and_apply(&mut guard, &converted).await?;
        }

        self.recalc_locked(&mut guard);
        tracing::debug!(
            booking_id = %id,
            slot_id = %slot_id,
            children_count,
            "slot booking materialized"
        );
        Ok(())
    }

    /// Cancel a booking. Its entries remain on their slots but stop counting
    /// toward occupancy; every referenced slot is recalced under its lock.
    pub async fn cancel_booking(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        let booking = self.get_booking(&id).ok_or(EngineError::NotFound(id))?;
        match actor {
            Actor::Parent(pid) if *pid == booking.parent_id => {}
            Actor::Caregiver(cid) if *cid == booking.caregiver_id => {}
            Actor::Admin => {}
            _ => return Err(EngineError::NotOwner(id)),
        }
        match booking.status {
            BookingStatus::Cancelled => return Ok(()),
            BookingStatus::Completed => {
                return Err(EngineError::Forbidden("booking already completed"))
            }
            _ => {}
        }

        let now = now_ms();
        let event = Event::BookingStatusChanged {
            id,
            status: BookingStatus::Cancelled,
            at: now,
        };
        self.wal_append(&event).await?;
        if let Some(mut b) = self.bookings.get_mut(&id) {
            b.transition(BookingStatus::Cancelled, now);
        }
        self.notify.send(booking.caregiver_id, &event);

        let slot_ids = self
            .booking_slots
            .get(&id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        for slot_id in slot_ids {
            if let Some(slot) = self.get_slot(&slot_id) {
                let mut guard = slot.write().await;
                self.recalc_locked(&mut guard);
                self.notify.send_slot(slot_id, guard.caregiver_id, &event);
            }
        }
        tracing::debug!(booking_id = %id, "booking cancelled");
        Ok(())
    }

    /// Payment Gateway seam: a successful charge confirms a Pending booking,
    /// a failed one cancels it. Repeated success notifications are no-ops.
    pub async fn apply_payment_event(
        &self,
        actor: &Actor,
        booking_id: Ulid,
        succeeded: bool,
    ) -> Result<(), EngineError> {
        let booking = self.get_booking(&booking_id).ok_or(EngineError::NotFound(booking_id))?;
        match actor {
            Actor::Admin => {}
            Actor::Parent(pid) if *pid == booking.parent_id => {}
            _ => return Err(EngineError::Forbidden("payment events need admin or the paying parent")),
        }

        if succeeded {
            match booking.status {
                BookingStatus::Confirmed => return Ok(()),
                BookingStatus::Pending => {}
                _ => return Err(EngineError::Forbidden("booking is not awaiting payment")),
            }
            let now = now_ms();
            let event = Event::BookingStatusChanged {
                id: booking_id,
                status: BookingStatus::Confirmed,
                at: now,
            };
            self.wal_append(&event).await?;
            if let Some(mut b) = self.bookings.get_mut(&booking_id) {
                b.transition(BookingStatus::Confirmed, now);
            }
            self.notify.send(booking.caregiver_id, &event);
            Ok(())
        } else {
            match booking.status {
                BookingStatus::Cancelled => Ok(()),
                BookingStatus::Pending => self.cancel_booking(&Actor::Admin, booking_id).await,
                _ => Err(EngineError::Forbidden("booking is not awaiting payment")),
            }
        }
    }

    /// Repair flow for bookings that consume no slot capacity (direct
    /// bookings, or bookings whose slot attachment was lost). Finds a slot of
    /// the booking's caregiver covering its span, expands its capacity when
    /// full, creates one when none covers, then attaches the entry and
    /// recalcs. Returns the slot the booking now counts against.
    pub async fn reconcile_orphaned_booking(
        &self,
        actor: &Actor,
        booking_id: Ulid,
    ) -> Result<Ulid, EngineError> {
        actor.require_admin("repair is an operator action")?;
        let booking = self.get_booking(&booking_id).ok_or(EngineError::NotFound(booking_id))?;
        if booking.status == BookingStatus::Cancelled {
            return Err(EngineError::Forbidden("cancelled bookings are not repaired"));
        }
        if self.booking_slots.get(&booking_id).is_some_and(|s| !s.value().is_empty()) {
            return Err(EngineError::AlreadyExists(booking_id));
        }

        let candidates = self
            .caregiver_slots
            .get(&booking.caregiver_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        // Prefer a covering slot with room; fall back to a covering slot we
        // can widen. None of the reads hold the final write lock, so re-check
        // after acquiring it.
        let mut covering: Option<Ulid> = None;
        for slot_id in candidates {
            let Some(slot) = self.get_slot(&slot_id) else { continue };
            let Ok(guard) = slot.try_read() else { continue };
            if guard.status == SlotStatus::Cancelled || !guard.span.contains_span(&booking.span) {
                continue;
            }
            let occupancy = self.derived_occupancy(&guard);
            if guard.total_capacity.saturating_sub(occupancy) >= booking.children_count {
                covering = Some(slot_id);
                break;
            }
            covering.get_or_insert(slot_id);
        }

        let slot_id = match covering {
            Some(slot_id) => slot_id,
            None => {
                // Compensating slot creation so the booking has capacity to
                // count against.
                let slot_id = Ulid::new();
                let event = Event::SlotCreated {
                    id: slot_id,
                    caregiver_id: booking.caregiver_id,
                    span: booking.span,
                    total_capacity: booking.children_count,
                    base_rate: booking.pricing.hourly_rate,
                    recurrence: None,
                    notes: None,
                };
                self.wal_append(&event).await?;
                let slot = SlotState::new(
                    slot_id,
                    booking.caregiver_id,
                    booking.span,
                    booking.children_count,
                    booking.pricing.hourly_rate,
                    None,
                    None,
                );
                self.caregiver_slots
                    .entry(booking.caregiver_id)
                    .or_default()
                    .push(slot_id);
                self.slots
                    .insert(slot_id, std::sync::Arc::new(tokio::sync::RwLock::new(slot)));
                self.notify.send_slot(slot_id, booking.caregiver_id, &event);
                tracing::info!(
                    booking_id = %booking_id,
                    slot_id = %slot_id,
                    "created compensating slot for orphaned booking"
                );
                slot_id
            }
        };

        let slot = self.get_slot(&slot_id).ok_or(EngineError::NotFound(slot_id))?;
        let mut guard = slot.write().await;

        let occupancy = self.derived_occupancy(&guard);
        let needed = occupancy + booking.children_count;
        if guard.total_capacity < needed {
            let event = Event::SlotUpdated {
                id: slot_id,
                span: guard.span,
                total_capacity: needed,
                base_rate: guard.base_rate,
                current_rate: guard.current_rate,
                status: guard.status,
                recurrence: guard.recurrence.clone(),
                notes: guard.notes.clone(),
            };
            self.persist_and_apply(&mut guard, &event).await?;
            tracing::info!(
                slot_id = %slot_id,
                total_capacity = needed,
                "expanded slot capacity during orphan repair"
            );
        }

        let entry = Event::EntryAdded {
            slot_id,
            booking_id,
            children_count: booking.children_count,
            spots_used: booking.children_count,
            rate_applied: booking.pricing.hourly_rate,
        };
        self.persist_and_apply(&mut guard, &entry).await?;
        self.booking_slots.entry(booking_id).or_default().push(slot_id);
        self.recalc_locked(&mut guard);
        tracing::info!(booking_id = %booking_id, slot_id = %slot_id, "orphaned booking attached");
        Ok(slot_id)
    }
}
