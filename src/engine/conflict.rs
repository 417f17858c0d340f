use ulid::Ulid;

use crate::lifecycle::OverlapScope;
use crate::model::*;
use crate::validation::ValidationError;

use super::EngineError;

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Optional duration cap. `None` admits any length.
pub(crate) fn validate_span(span: &Span, max_hours: Option<Ms>) -> Result<(), EngineError> {
    if let Some(hours) = max_hours
        && span.duration_ms() > hours.saturating_mul(crate::limits::MS_PER_HOUR)
    {
        return Err(EngineError::LimitExceeded("reservation longer than allowed"));
    }
    Ok(())
}

/// First reservation on the studio that blocks `span`, if any.
///
/// Only reservations whose state is in `scope` count, and `exclude` (the
/// reservation being edited) never conflicts with itself. Touching edges are
/// not conflicts.
pub fn find_conflict(
    ss: &StudioState,
    span: &Span,
    scope: OverlapScope,
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    ss.overlapping(span)
        .filter(|r| Some(r.id) != exclude)
        .find(|r| scope.includes(r.state) && r.span.overlaps(span))
        .map(|r| r.id)
}

pub(crate) fn check_no_overlap(
    ss: &StudioState,
    span: &Span,
    scope: OverlapScope,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(ss, span, scope, exclude) {
        Some(existing) => {
            tracing::debug!(
                "studio {} slot [{}, {}) conflicts with reservation {existing}",
                ss.id(),
                span.start,
                span.end
            );
            Err(ValidationError::overlap().into())
        }
        None => Ok(()),
    }
}
