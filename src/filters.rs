//! Named predicate builders over the catalog and the reservation table.

use serde::Deserialize;
use ulid::Ulid;

use crate::lifecycle::ReservationState;
use crate::model::{Place, Reservation, Studio};

/// Studio search. Every unset criterion matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StudioFilter {
    /// Exact city name of the studio's place.
    pub city: Option<String>,
    /// Strict upper bound on the hourly price, in cents.
    pub under_price: Option<u64>,
    /// When set, only studios that offer options.
    pub has_options: bool,
    /// When set, only studios that authorize premium.
    pub premium: bool,
}

impl StudioFilter {
    pub fn by_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn under_price(mut self, price: u64) -> Self {
        self.under_price = Some(price);
        self
    }

    pub fn has_options(mut self) -> Self {
        self.has_options = true;
        self
    }

    pub fn premium(mut self) -> Self {
        self.premium = true;
        self
    }

    pub fn matches(&self, studio: &Studio, place: &Place) -> bool {
        if let Some(city) = &self.city
            && place.city != *city
        {
            return false;
        }
        if let Some(max) = self.under_price
            && studio.hourly_price >= max
        {
            return false;
        }
        if self.has_options && !studio.has_options {
            return false;
        }
        if self.premium && !studio.authorize_premium {
            return false;
        }
        true
    }
}

/// Reservation listing scopes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "user_id")]
pub enum ReservationScope {
    #[default]
    All,
    IsPayed,
    IsNotPayed,
    IsCanceled,
    ForUser(Ulid),
}

impl ReservationScope {
    pub fn matches(&self, reservation: &Reservation) -> bool {
        match self {
            ReservationScope::All => true,
            ReservationScope::IsPayed => reservation.state == ReservationState::Payed,
            ReservationScope::IsNotPayed => reservation.state != ReservationState::Payed,
            ReservationScope::IsCanceled => reservation.state == ReservationState::Cancel,
            ReservationScope::ForUser(user_id) => reservation.user_id == *user_id,
        }
    }
}
