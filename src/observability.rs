use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "aulario_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "aulario_query_duration_seconds";

/// Counter: reservations committed (one per placement).
pub const RESERVATIONS_COMMITTED_TOTAL: &str = "aulario_reservations_committed_total";

/// Counter: scheduling commits rejected by the write-time conflict check.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "aulario_reservation_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "aulario_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "aulario_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "aulario_connections_rejected_total";

/// Gauge: number of active tenants (loaded campus engines).
pub const TENANTS_ACTIVE: &str = "aulario_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "aulario_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "aulario_wal_flush_batch_size";

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
        Command::InsertRoom { .. } => "insert_room",
        Command::UpdateRoom { .. } => "update_room",
        Command::DeleteRoom { .. } => "delete_room",
        Command::InsertModule { .. } => "insert_module",
        Command::InsertExam { .. } => "insert_exam",
        Command::DeleteExam { .. } => "delete_exam",
        Command::InsertReservations { .. } => "insert_reservations",
        Command::MoveReservation { .. } => "move_reservation",
        Command::ConfirmReservation { .. } => "confirm_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::SelectRooms { .. } => "select_rooms",
        Command::SelectModules => "select_modules",
        Command::SelectExams { .. } => "select_exams",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectAvailability { .. } => "select_availability",
        Command::Listen { .. } => "listen",
    }
}
