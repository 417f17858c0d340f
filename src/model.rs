use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::lifecycle::ReservationState;
use crate::limits::MS_PER_HOUR;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Fractional hours, not rounded.
    pub fn duration_hours(&self) -> f64 {
        self.duration_ms() as f64 / MS_PER_HOUR as f64
    }

    /// Strict on both sides: spans that only share an edge do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    pub id: Ulid,
    pub name: String,
    pub city: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Studio {
    pub id: Ulid,
    pub place_id: Ulid,
    pub name: String,
    pub description: Option<String>,
    /// Hourly rate in cents.
    pub hourly_price: u64,
    pub has_options: bool,
    pub authorize_premium: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub user_id: Ulid,
    pub studio_id: Ulid,
    pub option_id: Option<Ulid>,
    pub coupon_id: Option<Ulid>,
    pub span: Span,
    pub state: ReservationState,
    pub created_at: Ms,
}

impl Reservation {
    pub fn start_time(&self) -> Ms {
        self.span.start
    }

    pub fn end_time(&self) -> Ms {
        self.span.end
    }
}

/// A studio together with every reservation ever admitted for it.
#[derive(Debug, Clone)]
pub struct StudioState {
    pub studio: Studio,
    /// Sorted by `span.start`. Cancelled reservations stay in the list.
    pub reservations: Vec<Reservation>,
}

impl StudioState {
    pub fn new(studio: Studio) -> Self {
        Self {
            studio,
            reservations: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.studio.id
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Return only reservations whose span overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }
}

/// WAL record format. Catalog events carry whole records, reservation events are flat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    PlaceCreated {
        place: Place,
    },
    StudioCreated {
        studio: Studio,
    },
    StudioUpdated {
        studio: Studio,
    },
    ReservationAdmitted {
        id: Ulid,
        user_id: Ulid,
        studio_id: Ulid,
        option_id: Option<Ulid>,
        coupon_id: Option<Ulid>,
        span: Span,
        created_at: Ms,
    },
    ReservationUpdated {
        id: Ulid,
        studio_id: Ulid,
        option_id: Option<Ulid>,
        coupon_id: Option<Ulid>,
        span: Span,
    },
    ReservationPaid {
        id: Ulid,
        studio_id: Ulid,
    },
    ReservationCancelled {
        id: Ulid,
        studio_id: Ulid,
    },
}

impl Event {
    /// The studio whose state this event mutates, for reservation events.
    pub fn studio_id(&self) -> Option<Ulid> {
        match self {
            Event::ReservationAdmitted { studio_id, .. }
            | Event::ReservationUpdated { studio_id, .. }
            | Event::ReservationPaid { studio_id, .. }
            | Event::ReservationCancelled { studio_id, .. } => Some(*studio_id),
            Event::StudioUpdated { studio } => Some(studio.id),
            Event::PlaceCreated { .. } | Event::StudioCreated { .. } => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudioInfo {
    pub studio: Studio,
    pub city: String,
    pub reservation_count: usize,
}
