use serde::Serialize;
use ulid::Ulid;

use crate::model::{Reservation, Studio};

/// Billing view of a reservation, recomputed on every read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricingSnapshot {
    pub reservation_id: Ulid,
    pub duration_hours: f64,
    /// Studio rate at the time of the snapshot, in cents.
    pub hourly_price: u64,
    /// `duration_hours * hourly_price`, in cents, unrounded.
    pub amount: f64,
}

pub fn duration_hours(reservation: &Reservation) -> f64 {
    reservation.span.duration_hours()
}

impl PricingSnapshot {
    pub fn compute(reservation: &Reservation, studio: &Studio) -> Self {
        let hours = duration_hours(reservation);
        Self {
            reservation_id: reservation.id,
            duration_hours: hours,
            hourly_price: studio.hourly_price,
            amount: hours * studio.hourly_price as f64,
        }
    }
}
