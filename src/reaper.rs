use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::engine::Engine;

/// Background task that stamps lapsed holds Expired every 5 seconds, and
/// retires Available slots whose window has fully passed.
///
/// Capacity math never waits for this: `effective_available` ignores lapsed
/// holds the moment `expires_at` passes. The sweep exists so stored statuses,
/// notifications, and the WAL catch up with what the arithmetic already
/// decided.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        let now = crate::engine::now_ms();
        let expired = engine.collect_expired_holds(now);
        for (slot_id, hold_id) in expired {
            match engine.mark_hold_expired(slot_id, hold_id, now).await {
                Ok(true) => {
                    metrics::counter!(crate::observability::HOLDS_EXPIRED_TOTAL).increment(1);
                    info!("reaped expired hold {hold_id}");
                }
                // Cancelled or converted between sweep and stamp.
                Ok(false) => {}
                Err(e) => {
                    debug!("reaper skip {hold_id}: {e}");
                }
            }
        }
        for slot_id in engine.collect_past_slots(now) {
            match engine.mark_slot_expired(slot_id, now).await {
                Ok(true) => {
                    metrics::counter!(crate::observability::SLOTS_EXPIRED_TOTAL).increment(1);
                    info!("expired past slot {slot_id}");
                }
                Ok(false) => {}
                Err(e) => {
                    debug!("slot expiry skip {slot_id}: {e}");
                }
            }
        }
    }
}

/// Background task that re-derives drifted slot counters every 60 seconds.
/// The safety net behind the per-operation recalcs: whatever wrote a stale
/// counter, ground truth wins within a minute.
pub async fn run_reconciler(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let corrected = engine.reconcile_all().await;
        if corrected > 0 {
            metrics::counter!(crate::observability::DRIFT_SLOTS_CORRECTED_TOTAL)
                .increment(corrected as u64);
            info!("reconciler corrected {corrected} drifted slots");
        }
    }
}

/// Background task that compacts the WAL when enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("compacted WAL after {appends} appends"),
                Err(e) => tracing::error!("WAL compaction failed: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use ulid::Ulid;

    use crate::engine::{now_ms, Actor, Engine};
    use crate::model::*;
    use crate::notify::NotifyHub;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("nido_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn reaper_collects_and_stamps_lapsed_holds() {
        let path = test_wal_path("reaper_collect.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(path, notify, 1500).unwrap());

        let caregiver = Ulid::new();
        let parent = Ulid::new();
        let slot_id = Ulid::new();
        let now = now_ms();
        engine
            .create_slot(
                &Actor::Caregiver(caregiver),
                slot_id,
                caregiver,
                Span::new(now + MS_PER_HOUR, now + 2 * MS_PER_HOUR),
                3,
                2500,
                None,
                None,
            )
            .await
            .unwrap();

        let hold_id = Ulid::new();
        engine
            .reserve_spots(&Actor::Parent(parent), hold_id, slot_id, 2, 2)
            .await
            .unwrap();

        // Force the hold into the past, as if 15 minutes went by.
        {
            let slot = engine.get_slot(&slot_id).unwrap();
            let mut guard = slot.write().await;
            guard.hold_mut(hold_id).unwrap().expires_at = now - 1;
        }

        let expired = engine.collect_expired_holds(now);
        assert_eq!(expired, vec![(slot_id, hold_id)]);

        assert!(engine.mark_hold_expired(slot_id, hold_id, now).await.unwrap());
        // Second stamp is a no-op.
        assert!(!engine.mark_hold_expired(slot_id, hold_id, now).await.unwrap());
        assert!(engine.collect_expired_holds(now).is_empty());

        let slot = engine.get_slot(&slot_id).unwrap();
        let guard = slot.read().await;
        assert_eq!(guard.hold(hold_id).unwrap().status, HoldStatus::Expired);
        assert_eq!(guard.effective_available(now), 3);
    }

    #[tokio::test]
    async fn past_available_slots_are_stamped_expired() {
        let path = test_wal_path("reaper_slot_expiry.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(path, notify, 1500).unwrap());

        let caregiver = Ulid::new();
        let now = now_ms();
        let past = Ulid::new();
        let upcoming = Ulid::new();
        engine
            .create_slot(
                &Actor::Caregiver(caregiver),
                past,
                caregiver,
                Span::new(now - 2 * MS_PER_HOUR, now - MS_PER_HOUR),
                3,
                2500,
                None,
                None,
            )
            .await
            .unwrap();
        engine
            .create_slot(
                &Actor::Caregiver(caregiver),
                upcoming,
                caregiver,
                Span::new(now + MS_PER_HOUR, now + 2 * MS_PER_HOUR),
                3,
                2500,
                None,
                None,
            )
            .await
            .unwrap();

        // Only the finished window is collected.
        assert_eq!(engine.collect_past_slots(now), vec![past]);

        assert!(engine.mark_slot_expired(past, now).await.unwrap());
        // Second stamp is a no-op.
        assert!(!engine.mark_slot_expired(past, now).await.unwrap());
        assert!(engine.collect_past_slots(now).is_empty());

        let slot = engine.get_slot(&past).unwrap();
        let guard = slot.read().await;
        assert_eq!(guard.status, SlotStatus::Expired);

        let other = engine.get_slot(&upcoming).unwrap();
        assert_eq!(other.read().await.status, SlotStatus::Available);
    }
}
