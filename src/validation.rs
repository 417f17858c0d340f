//! Admission rules, one function per rule.
//!
//! Each rule returns a tagged [`ValidationError`] that the caller can render
//! next to the offending field. The admission pipeline in
//! `engine::admission` applies them in order and stops at the first failure.

use chrono::DateTime;
use serde::Serialize;
use thiserror::Error;

use crate::lifecycle::ReservationState;
use crate::model::{Ms, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    MissingStartTime,
    MissingEndTime,
    PastStart,
    EndBeforeStart,
    Overlap,
}

/// A user-correctable rejection of a reservation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub kind: ValidationKind,
    pub field: &'static str,
    pub message: &'static str,
}

impl ValidationError {
    pub fn missing_start_time() -> Self {
        Self {
            kind: ValidationKind::MissingStartTime,
            field: "start_time",
            message: "start time is required",
        }
    }

    pub fn missing_end_time() -> Self {
        Self {
            kind: ValidationKind::MissingEndTime,
            field: "end_time",
            message: "end time is required",
        }
    }

    pub fn past_start() -> Self {
        Self {
            kind: ValidationKind::PastStart,
            field: "start_time",
            message: "cannot reserve in the past",
        }
    }

    pub fn end_before_start() -> Self {
        Self {
            kind: ValidationKind::EndBeforeStart,
            field: "end_time",
            message: "cannot end before starting",
        }
    }

    pub fn overlap() -> Self {
        Self {
            kind: ValidationKind::Overlap,
            field: "start_time",
            message: "this slot has already been booked, please choose another one",
        }
    }
}

/// Parse an RFC 3339 timestamp into Unix milliseconds.
pub fn parse_timestamp(raw: &str) -> Option<Ms> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.timestamp_millis())
}

pub fn require_start(start: Option<Ms>) -> Result<Ms, ValidationError> {
    start.ok_or_else(ValidationError::missing_start_time)
}

pub fn require_end(end: Option<Ms>) -> Result<Ms, ValidationError> {
    end.ok_or_else(ValidationError::missing_end_time)
}

pub fn check_future_start(start: Ms, now: Ms) -> Result<(), ValidationError> {
    if start > now {
        Ok(())
    } else {
        Err(ValidationError::past_start())
    }
}

pub fn check_order(start: Ms, end: Ms) -> Result<Span, ValidationError> {
    Span::try_new(start, end).ok_or_else(ValidationError::end_before_start)
}

/// Presence, then the temporal rules gated on the reservation state.
///
/// Unpaid reservations must start strictly after `now`. Paid ones skip the
/// past-start rule so historical bookings stay valid when re-validated.
pub fn temporal_rules(
    state: ReservationState,
    start: Option<Ms>,
    end: Option<Ms>,
    now: Ms,
) -> Result<Span, ValidationError> {
    let start = require_start(start)?;
    let end = require_end(end)?;
    if state.not_payed_yet() {
        check_future_start(start, now)?;
    }
    check_order(start, end)
}
