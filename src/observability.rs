use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "nido_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "nido_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "nido_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "nido_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "nido_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "nido_tenants_active";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "nido_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "nido_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "nido_wal_flush_batch_size";

/// Counter: holds stamped Expired by the reaper.
pub const HOLDS_EXPIRED_TOTAL: &str = "nido_holds_expired_total";

/// Counter: past Available slots stamped Expired by the reaper.
pub const SLOTS_EXPIRED_TOTAL: &str = "nido_slots_expired_total";

/// Counter: drifted slots corrected (reconciler, any trigger).
pub const DRIFT_SLOTS_CORRECTED_TOTAL: &str = "nido_drift_slots_corrected_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertSlot { .. } => "insert_slot",
        Command::UpdateSlot { .. } => "update_slot",
        Command::DeleteSlot { .. } => "delete_slot",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::InsertBooking { .. } => "insert_booking",
        Command::InsertDirectBooking { .. } => "insert_direct_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::InsertPaymentEvent { .. } => "insert_payment_event",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectAvailableSlots { .. } => "select_available_slots",
        Command::SelectRealtimeAvailability { .. } => "select_realtime_availability",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectDrift { .. } => "select_drift",
        Command::ReconcileSlot { .. } => "reconcile_slot",
        Command::ReconcileCaregiver { .. } => "reconcile_caregiver",
        Command::ReconcileAll => "reconcile_all",
        Command::Repair { .. } => "repair",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::UnlistenAll => "unlisten_all",
    }
}
