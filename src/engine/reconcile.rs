use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Report slots whose stored counters disagree with the entry-derived
    /// ground truth. Capacity-1 slots are skipped: their status flips are
    /// visible directly and the shared-capacity drift class doesn't apply.
    /// Contended slots are skipped too; a later pass catches them.
    pub fn find_drifted_slots(&self, caregiver: Option<Ulid>) -> Vec<DriftReport> {
        let ids: Vec<Ulid> = match caregiver {
            Some(cid) => self
                .caregiver_slots
                .get(&cid)
                .map(|e| e.value().clone())
                .unwrap_or_default(),
            None => self.slots.iter().map(|e| *e.key()).collect(),
        };

        let mut reports = Vec::new();
        for slot_id in ids {
            let Some(slot) = self.get_slot(&slot_id) else { continue };
            let Ok(guard) = slot.try_read() else { continue };
            if guard.total_capacity <= 1 {
                continue;
            }
            let actual = self.derived_occupancy(&guard).min(guard.total_capacity);
            let expected_available = guard.total_capacity - actual;
            if guard.current_occupancy != actual || guard.available_spots != expected_available {
                reports.push(DriftReport {
                    slot_id,
                    caregiver_id: guard.caregiver_id,
                    stored_occupancy: guard.current_occupancy,
                    actual_occupancy: actual,
                    stored_available: guard.available_spots,
                    expected_available,
                });
            }
        }
        reports
    }

    /// Overwrite a slot's counters from ground truth. Idempotent; the derived
    /// value always wins, whatever wrote the stored one. Returns whether
    /// anything changed.
    pub async fn reconcile_slot(&self, id: Ulid) -> Result<bool, EngineError> {
        let slot = self.get_slot(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = slot.write().await;
        let before = (guard.current_occupancy, guard.available_spots, guard.status);
        self.recalc_locked(&mut guard);
        let changed = before != (guard.current_occupancy, guard.available_spots, guard.status);
        if changed {
            tracing::warn!(
                slot_id = %id,
                stored_occupancy = before.0,
                actual_occupancy = guard.current_occupancy,
                "corrected drifted slot counters"
            );
        }
        Ok(changed)
    }

    /// Reconcile every drifted slot of one caregiver. Returns the number of
    /// slots corrected.
    pub async fn reconcile_caregiver(&self, caregiver_id: Ulid) -> usize {
        self.reconcile_reports(self.find_drifted_slots(Some(caregiver_id))).await
    }

    /// Full sweep over the tenant. Returns the number of slots corrected.
    pub async fn reconcile_all(&self) -> usize {
        self.reconcile_reports(self.find_drifted_slots(None)).await
    }

    async fn reconcile_reports(&self, reports: Vec<DriftReport>) -> usize {
        let mut corrected = 0;
        for report in reports {
            match self.reconcile_slot(report.slot_id).await {
                Ok(true) => corrected += 1,
                Ok(false) => {}
                // Slot deleted between detection and repair.
                Err(EngineError::NotFound(_)) => {}
                Err(e) => {
                    tracing::error!(slot_id = %report.slot_id, error = %e, "reconcile failed");
                }
            }
        }
        corrected
    }
}
