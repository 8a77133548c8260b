mod bookings;
mod error;
mod holds;
mod queries;
mod reconcile;
mod slots;

pub use error::EngineError;
pub use queries::SlotFilter;
pub use slots::SlotUpdate;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedSlotState = Arc<RwLock<SlotState>>;

/// Who is calling. Derived from the connection's `user` parameter at the
/// wire boundary; the Identity Service owns the ids themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Parent(Ulid),
    Caregiver(Ulid),
    Admin,
}

impl Actor {
    /// Caregiver-only operations, with admin override for repair flows.
    pub fn can_act_for_caregiver(&self, caregiver_id: Ulid) -> bool {
        match self {
            Actor::Caregiver(id) => *id == caregiver_id,
            Actor::Admin => true,
            Actor::Parent(_) => false,
        }
    }

    pub fn require_parent(&self, op: &'static str) -> Result<Ulid, EngineError> {
        match self {
            Actor::Parent(id) => Ok(*id),
            _ => Err(EngineError::Forbidden(op)),
        }
    }

    pub fn require_admin(&self, op: &'static str) -> Result<(), EngineError> {
        match self {
            Actor::Admin => Ok(()),
            _ => Err(EngineError::Forbidden(op)),
        }
    }
}

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as Ms
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.end <= span.start {
        return Err(EngineError::InvalidRange {
            start: span.start,
            end: span.end,
        });
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    pub slots: DashMap<Ulid, SharedSlotState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Platform commission in basis points, fixed per process.
    pub commission_bps: i64,
    /// Reverse lookup: hold id → slot id.
    pub(super) hold_to_slot: DashMap<Ulid, Ulid>,
    /// Caregiver → slot ids, for calendar-scoped reads and reconciliation.
    pub(super) caregiver_slots: DashMap<Ulid, Vec<Ulid>>,
    /// Durable commercial records, keyed by booking id.
    pub(super) bookings: DashMap<Ulid, Booking>,
    /// Booking → slots it consumes capacity from.
    pub(super) booking_slots: DashMap<Ulid, Vec<Ulid>>,
}

/// Apply a slot-scoped event directly to a SlotState (no locking — caller
/// holds the lock). Occupancy counters are NOT touched here; every path that
/// changes capacity consumption runs `recalc_locked` afterwards.
fn apply_to_slot(slot: &mut SlotState, event: &Event, hold_index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::SlotUpdated {
            span,
            total_capacity,
            base_rate,
            current_rate,
            status,
            recurrence,
            notes,
            ..
        } => {
            slot.span = *span;
            slot.total_capacity = *total_capacity;
            slot.base_rate = *base_rate;
            slot.current_rate = *current_rate;
            slot.status = *status;
            slot.recurrence = recurrence.clone();
            slot.notes = notes.clone();
        }
        Event::HoldPlaced {
            id,
            slot_id,
            parent_id,
            children_count,
            reserved_spots,
            expires_at,
        } => {
            slot.holds.push(Hold {
                id: *id,
                parent_id: *parent_id,
                children_count: *children_count,
                reserved_spots: *reserved_spots,
                status: HoldStatus::Active,
                expires_at: *expires_at,
            });
            hold_index.insert(*id, *slot_id);
        }
        Event::HoldCancelled { id, .. } => {
            if let Some(h) = slot.hold_mut(*id) {
                h.status = HoldStatus::Cancelled;
            }
        }
        Event::HoldExpired { id, .. } => {
            if let Some(h) = slot.hold_mut(*id) {
                h.status = HoldStatus::Expired;
            }
        }
        Event::HoldConverted { id, .. } => {
            if let Some(h) = slot.hold_mut(*id) {
                h.status = HoldStatus::Converted;
            }
        }
        Event::EntryAdded {
            booking_id,
            children_count,
            spots_used,
            rate_applied,
            ..
        } => {
            slot.entries.push(SlotEntry {
                booking_id: *booking_id,
                children_count: *children_count,
                spots_used: *spots_used,
                rate_applied: *rate_applied,
            });
        }
        // Slot create/delete are handled at the map level; booking events at
        // the bookings map.
        Event::SlotCreated { .. }
        | Event::SlotDeleted { .. }
        | Event::BookingCreated { .. }
        | Event::BookingStatusChanged { .. } => {}
    }
}

fn booking_from_created(event: &Event) -> Option<Booking> {
    if let Event::BookingCreated {
        id,
        parent_id,
        caregiver_id,
        span,
        children_count,
        address,
        pricing,
        status,
        at,
    } = event
    {
        let mut booking = Booking {
            id: *id,
            parent_id: *parent_id,
            caregiver_id: *caregiver_id,
            span: *span,
            children_count: *children_count,
            address: address.clone(),
            pricing: *pricing,
            status: BookingStatus::Pending,
            created_at: *at,
            confirmed_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
        };
        if *status != BookingStatus::Pending {
            booking.transition(*status, *at);
        }
        Some(booking)
    } else {
        None
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        commission_bps: i64,
    ) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            slots: DashMap::new(),
            wal_tx,
            notify,
            commission_bps,
            hold_to_slot: DashMap::new(),
            caregiver_slots: DashMap::new(),
            bookings: DashMap::new(),
            booking_slots: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context (e.g. lazy tenant
        // creation).
        for event in &events {
            match event {
                Event::SlotCreated {
                    id,
                    caregiver_id,
                    span,
                    total_capacity,
                    base_rate,
                    recurrence,
                    notes,
                } => {
                    let slot = SlotState::new(
                        *id,
                        *caregiver_id,
                        *span,
                        *total_capacity,
                        *base_rate,
                        recurrence.clone(),
                        notes.clone(),
                    );
                    engine.caregiver_slots.entry(*caregiver_id).or_default().push(*id);
                    engine.slots.insert(*id, Arc::new(RwLock::new(slot)));
                }
                Event::SlotDeleted { id } => {
                    engine.drop_slot_indexes(id);
                    engine.slots.remove(id);
                }
                Event::BookingCreated { .. } => {
                    if let Some(booking) = booking_from_created(event) {
                        engine.bookings.insert(booking.id, booking);
                    }
                }
                Event::BookingStatusChanged { id, status, at } => {
                    if let Some(mut b) = engine.bookings.get_mut(id) {
                        b.transition(*status, *at);
                    }
                }
                Event::EntryAdded { slot_id, booking_id, .. } => {
                    if let Some(entry) = engine.slots.get(slot_id) {
                        let slot_arc = entry.value().clone();
                        let mut guard = slot_arc.try_write().expect("replay: uncontended write");
                        apply_to_slot(&mut guard, event, &engine.hold_to_slot);
                        engine.booking_slots.entry(*booking_id).or_default().push(*slot_id);
                    }
                }
                other => {
                    if let Some(slot_id) = event_slot_id(other)
                        && let Some(entry) = engine.slots.get(&slot_id)
                    {
                        let slot_arc = entry.value().clone();
                        let mut guard = slot_arc.try_write().expect("replay: uncontended write");
                        apply_to_slot(&mut guard, other, &engine.hold_to_slot);
                    }
                }
            }
        }

        // Counters are never read from the log: derive them from the replayed
        // entries and booking statuses.
        for entry in engine.slots.iter() {
            let slot_arc = entry.value().clone();
            let mut guard = slot_arc.try_write().expect("replay: uncontended write");
            let occupancy = engine.derived_occupancy(&guard);
            guard.set_counters(occupancy);
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_slot(&self, id: &Ulid) -> Option<SharedSlotState> {
        self.slots.get(id).map(|e| e.value().clone())
    }

    pub fn get_slot_for_hold(&self, hold_id: &Ulid) -> Option<Ulid> {
        self.hold_to_slot.get(hold_id).map(|e| *e.value())
    }

    pub fn get_booking(&self, id: &Ulid) -> Option<Booking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    /// WAL-append + apply + notify in one call, under the caller's slot lock.
    pub(super) async fn persist_and_apply(
        &self,
        slot: &mut SlotState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        let (slot_id, caregiver_id) = (slot.id, slot.caregiver_id);
        apply_to_slot(slot, event, &self.hold_to_slot);
        self.notify.send_slot(slot_id, caregiver_id, event);
        Ok(())
    }

    /// Lookup hold → slot, get slot, acquire write lock.
    pub(super) async fn resolve_hold_write(
        &self,
        hold_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<SlotState>), EngineError> {
        let slot_id = self
            .get_slot_for_hold(hold_id)
            .ok_or(EngineError::NotFound(*hold_id))?;
        let slot = self
            .get_slot(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let guard = slot.write_owned().await;
        Ok((slot_id, guard))
    }

    /// Ground truth for a slot's occupancy: the sum of `spots_used` over its
    /// entries whose booking is not Cancelled. This is the only source the
    /// denormalized counters are ever written from.
    pub(super) fn derived_occupancy(&self, slot: &SlotState) -> u32 {
        slot.entries
            .iter()
            .filter(|e| {
                self.bookings
                    .get(&e.booking_id)
                    .is_none_or(|b| b.status != BookingStatus::Cancelled)
            })
            .map(|e| e.spots_used)
            .sum()
    }

    /// Re-derive and overwrite the slot's counters. Caller holds the lock.
    pub(super) fn recalc_locked(&self, slot: &mut SlotState) {
        let occupancy = self.derived_occupancy(slot);
        slot.set_counters(occupancy);
    }

    pub(super) fn drop_slot_indexes(&self, slot_id: &Ulid) {
        if let Some(entry) = self.slots.get(slot_id) {
            let slot_arc = entry.value().clone();
            if let Ok(guard) = slot_arc.try_read() {
                for hold in &guard.holds {
                    self.hold_to_slot.remove(&hold.id);
                }
                if let Some(mut ids) = self.caregiver_slots.get_mut(&guard.caregiver_id) {
                    ids.retain(|s| s != slot_id);
                }
            }
        }
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.slots.iter() {
            let slot_arc = entry.value().clone();
            let guard = match slot_arc.try_read() {
                Ok(g) => g,
                Err(_) => continue, // contended slot — catch it next round
            };

            events.push(Event::SlotCreated {
                id: guard.id,
                caregiver_id: guard.caregiver_id,
                span: guard.span,
                total_capacity: guard.total_capacity,
                base_rate: guard.base_rate,
                recurrence: guard.recurrence.clone(),
                notes: guard.notes.clone(),
            });
            // Re-assert mutable fields that SlotCreated doesn't carry.
            events.push(Event::SlotUpdated {
                id: guard.id,
                span: guard.span,
                total_capacity: guard.total_capacity,
                base_rate: guard.base_rate,
                current_rate: guard.current_rate,
                status: guard.status,
                recurrence: guard.recurrence.clone(),
                notes: guard.notes.clone(),
            });

            for hold in &guard.holds {
                // Lapsed and closed holds don't survive compaction.
                if hold.status != HoldStatus::Active || hold.expires_at <= now_ms() {
                    continue;
                }
                events.push(Event::HoldPlaced {
                    id: hold.id,
                    slot_id: guard.id,
                    parent_id: hold.parent_id,
                    children_count: hold.children_count,
                    reserved_spots: hold.reserved_spots,
                    expires_at: hold.expires_at,
                });
            }
            for slot_entry in &guard.entries {
                events.push(Event::EntryAdded {
                    slot_id: guard.id,
                    booking_id: slot_entry.booking_id,
                    children_count: slot_entry.children_count,
                    spots_used: slot_entry.spots_used,
                    rate_applied: slot_entry.rate_applied,
                });
            }
        }

        for booking in self.bookings.iter() {
            let b = booking.value();
            events.push(Event::BookingCreated {
                id: b.id,
                parent_id: b.parent_id,
                caregiver_id: b.caregiver_id,
                span: b.span,
                children_count: b.children_count,
                address: b.address.clone(),
                pricing: b.pricing,
                status: BookingStatus::Pending,
                at: b.created_at,
            });
            if b.status != BookingStatus::Pending {
                let at = match b.status {
                    BookingStatus::Confirmed => b.confirmed_at,
                    BookingStatus::InProgress => b.started_at,
                    BookingStatus::Completed => b.completed_at,
                    BookingStatus::Cancelled => b.cancelled_at,
                    BookingStatus::Pending => None,
                }
                .unwrap_or(b.created_at);
                events.push(Event::BookingStatusChanged {
                    id: b.id,
                    status: b.status,
                    at,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Extract the slot id from a slot-scoped event.
fn event_slot_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::HoldPlaced { slot_id, .. }
        | Event::HoldCancelled { slot_id, .. }
        | Event::HoldExpired { slot_id, .. }
        | Event::HoldConverted { slot_id, .. }
        | Event::EntryAdded { slot_id, .. } => Some(*slot_id),
        Event::SlotUpdated { id, .. } => Some(*id),
        Event::SlotCreated { .. }
        | Event::SlotDeleted { .. }
        | Event::BookingCreated { .. }
        | Event::BookingStatusChanged { .. } => None,
    }
}
