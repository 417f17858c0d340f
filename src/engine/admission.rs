use std::time::Instant;

use tracing::info;
use ulid::Ulid;

use crate::lifecycle::ReservationState;
use crate::limits::MAX_RESERVATIONS_PER_STUDIO;
use crate::model::*;
use crate::observability;
use crate::validation::temporal_rules;

use super::conflict::{check_no_overlap, validate_span};
use super::{Engine, EngineError};

/// A request to book a studio slot. `now` is supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRequest {
    pub user_id: Ulid,
    pub studio_id: Ulid,
    pub option_id: Option<Ulid>,
    pub coupon_id: Option<Ulid>,
    pub start_time: Option<Ms>,
    pub end_time: Option<Ms>,
    pub now: Ms,
}

impl AdmissionRequest {
    pub fn new(user_id: Ulid, studio_id: Ulid, start_time: Ms, end_time: Ms, now: Ms) -> Self {
        Self {
            user_id,
            studio_id,
            option_id: None,
            coupon_id: None,
            start_time: Some(start_time),
            end_time: Some(end_time),
            now,
        }
    }

    pub fn with_option(mut self, option_id: Ulid) -> Self {
        self.option_id = Some(option_id);
        self
    }

    pub fn with_coupon(mut self, coupon_id: Ulid) -> Self {
        self.coupon_id = Some(coupon_id);
        self
    }
}

/// Changes to an existing reservation. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationPatch {
    pub option_id: Option<Option<Ulid>>,
    pub coupon_id: Option<Option<Ulid>>,
    pub start_time: Option<Ms>,
    pub end_time: Option<Ms>,
}

impl ReservationPatch {
    pub fn option(mut self, option_id: Option<Ulid>) -> Self {
        self.option_id = Some(option_id);
        self
    }

    pub fn coupon(mut self, coupon_id: Option<Ulid>) -> Self {
        self.coupon_id = Some(coupon_id);
        self
    }

    pub fn reschedule(mut self, start_time: Ms, end_time: Ms) -> Self {
        self.start_time = Some(start_time);
        self.end_time = Some(end_time);
        self
    }
}

impl Engine {
    /// Validate and persist a new reservation in `created` state.
    ///
    /// Rules run in order: presence, start in the future, end after start,
    /// no overlap with an active reservation of the studio. The overlap check
    /// and the insert share the studio's write lock, so concurrent requests for
    /// overlapping slots admit exactly one.
    pub async fn admit(&self, req: AdmissionRequest) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.admit_locked(&req).await;
        observability::record_admission(&result, started.elapsed());
        match &result {
            Ok(r) => info!(
                "admitted reservation {} on studio {} [{}, {})",
                r.id, r.studio_id, r.span.start, r.span.end
            ),
            Err(e) => info!("rejected reservation on studio {}: {e}", req.studio_id),
        }
        result
    }

    async fn admit_locked(&self, req: &AdmissionRequest) -> Result<Reservation, EngineError> {
        let span = temporal_rules(ReservationState::Created, req.start_time, req.end_time, req.now)?;
        validate_span(&span, self.options.max_reservation_hours)?;

        let mut guard = self.lock_studio(req.studio_id).await?;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_STUDIO {
            return Err(EngineError::LimitExceeded("too many reservations on studio"));
        }
        check_no_overlap(&guard, &span, self.options.overlap_scope, None)?;

        let id = Ulid::new();
        let event = Event::ReservationAdmitted {
            id,
            user_id: req.user_id,
            studio_id: req.studio_id,
            option_id: req.option_id,
            coupon_id: req.coupon_id,
            span,
            created_at: req.now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Edit an existing reservation.
    ///
    /// Slot changes are only allowed while unpaid and go through the full
    /// pipeline with the reservation itself excluded from the overlap check.
    /// Attribute edits on a paid reservation skip the temporal rules.
    pub async fn update_reservation(
        &self,
        id: Ulid,
        patch: ReservationPatch,
        now: Ms,
    ) -> Result<Reservation, EngineError> {
        let mut guard = self.resolve_reservation_write(&id).await?;
        let current = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;
        if current.state.is_terminal() {
            return Err(EngineError::Invalid("cancelled reservations cannot be edited"));
        }

        let start = patch.start_time.unwrap_or(current.span.start);
        let end = patch.end_time.unwrap_or(current.span.end);
        let rescheduled = start != current.span.start || end != current.span.end;
        if rescheduled && !current.state.not_payed_yet() {
            return Err(EngineError::PaidReservationImmutable(id));
        }

        let span = temporal_rules(current.state, Some(start), Some(end), now)?;
        if rescheduled {
            validate_span(&span, self.options.max_reservation_hours)?;
        }
        check_no_overlap(&guard, &span, self.options.overlap_scope, Some(id))?;

        let event = Event::ReservationUpdated {
            id,
            studio_id: current.studio_id,
            option_id: patch.option_id.unwrap_or(current.option_id),
            coupon_id: patch.coupon_id.unwrap_or(current.coupon_id),
            span,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("updated reservation {id}");
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Run the admission rules against a stored reservation without changing it.
    pub async fn revalidate(&self, id: Ulid, now: Ms) -> Result<Reservation, EngineError> {
        let studio_id = self
            .studio_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = self.read_studio(studio_id).await?;
        let current = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;

        let span = temporal_rules(
            current.state,
            Some(current.span.start),
            Some(current.span.end),
            now,
        )?;
        if current.state.is_active_for_overlap() {
            check_no_overlap(&guard, &span, self.options.overlap_scope, Some(id))?;
        }
        Ok(current)
    }
}
