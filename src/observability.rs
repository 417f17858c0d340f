use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::engine::EngineError;
use crate::model::Reservation;
use crate::validation::ValidationKind;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: admission attempts. Labels: outcome.
pub const ADMISSIONS_TOTAL: &str = "studiobook_admissions_total";

/// Histogram: admission latency in seconds, lock wait included.
pub const ADMISSION_DURATION_SECONDS: &str = "studiobook_admission_duration_seconds";

/// Counter: lifecycle transitions. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "studiobook_transitions_total";

// ── USE metrics (utilization) ───────────────────────────────────

/// Gauge: studios loaded in the engine.
pub const STUDIOS_ACTIVE: &str = "studiobook_studios_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "studiobook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "studiobook_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "studiobook_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for the outcome of an admission.
pub fn outcome_label(result: &Result<Reservation, EngineError>) -> &'static str {
    match result {
        Ok(_) => "admitted",
        Err(EngineError::Validation(v)) => match v.kind {
            ValidationKind::MissingStartTime => "missing_start_time",
            ValidationKind::MissingEndTime => "missing_end_time",
            ValidationKind::PastStart => "past_start",
            ValidationKind::EndBeforeStart => "end_before_start",
            ValidationKind::Overlap => "overlap",
        },
        Err(EngineError::Storage(_)) => "storage_fault",
        Err(_) => "invalid",
    }
}

pub fn record_admission(result: &Result<Reservation, EngineError>, elapsed: Duration) {
    metrics::counter!(ADMISSIONS_TOTAL, "outcome" => outcome_label(result)).increment(1);
    metrics::histogram!(ADMISSION_DURATION_SECONDS).record(elapsed.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ValidationError;

    #[test]
    fn outcome_labels() {
        assert_eq!(outcome_label(&Err(ValidationError::overlap().into())), "overlap");
        assert_eq!(outcome_label(&Err(ValidationError::past_start().into())), "past_start");
        assert_eq!(outcome_label(&Err(EngineError::Storage("disk".into()))), "storage_fault");
        assert_eq!(outcome_label(&Err(EngineError::NotFound(ulid::Ulid::new()))), "invalid");
    }

    #[test]
    fn init_without_port_is_noop() {
        assert!(init(None).is_ok());
    }
}
