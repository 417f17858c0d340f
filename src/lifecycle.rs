use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a reservation.
///
/// `Created` is the only initial state. Payment moves it to `Payed`; the
/// cancellation flow moves either of the other two to `Cancel`, which is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationState {
    Created,
    Payed,
    Cancel,
}

impl ReservationState {
    /// Whether a reservation in this state blocks other bookings of the same studio.
    pub fn is_active_for_overlap(self) -> bool {
        matches!(self, ReservationState::Created | ReservationState::Payed)
    }

    /// Gates the temporal rules: only unpaid reservations must start in the future.
    pub fn not_payed_yet(self) -> bool {
        self == ReservationState::Created
    }

    /// Whether the payment collaborator has recorded a decision for this reservation.
    pub fn payment_decided(self) -> bool {
        self != ReservationState::Created
    }

    pub fn is_terminal(self) -> bool {
        self == ReservationState::Cancel
    }

    pub fn can_transition_to(self, next: ReservationState) -> bool {
        use ReservationState::*;
        matches!((self, next), (Created, Payed) | (Created, Cancel) | (Payed, Cancel))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationState::Created => "created",
            ReservationState::Payed => "payed",
            ReservationState::Cancel => "cancel",
        }
    }
}

impl fmt::Display for ReservationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which existing reservations the overlap check considers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapScope {
    /// Everything except cancelled reservations.
    #[default]
    Active,
    /// Active reservations with a recorded payment decision; unpaid `created`
    /// reservations do not block.
    PaidOnly,
}

impl OverlapScope {
    pub fn includes(self, state: ReservationState) -> bool {
        match self {
            OverlapScope::Active => state.is_active_for_overlap(),
            OverlapScope::PaidOnly => state.is_active_for_overlap() && state.payment_decided(),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Some(OverlapScope::Active),
            "paid_only" | "paid-only" => Some(OverlapScope::PaidOnly),
            _ => None,
        }
    }
}
