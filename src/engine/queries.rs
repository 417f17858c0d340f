use ulid::Ulid;

use crate::filters::{ReservationScope, StudioFilter};
use crate::model::*;
use crate::pricing::PricingSnapshot;

use super::conflict::find_conflict;
use super::{Engine, EngineError};

impl Engine {
    /// Whether `span` would collide with an existing reservation of the studio.
    /// Read-only; admission repeats this check under the write lock.
    pub async fn has_conflict(
        &self,
        studio_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let guard = self.read_studio(studio_id).await?;
        Ok(find_conflict(&guard, &span, self.options.overlap_scope, exclude).is_some())
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let studio_id = self
            .studio_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = self.read_studio(studio_id).await?;
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Reservations of a studio in start order, filtered by `scope`.
    pub async fn list_reservations(
        &self,
        studio_id: Ulid,
        scope: ReservationScope,
    ) -> Result<Vec<Reservation>, EngineError> {
        let guard = self.read_studio(studio_id).await?;
        Ok(guard
            .reservations
            .iter()
            .filter(|r| scope.matches(r))
            .cloned()
            .collect())
    }

    /// Every reservation made by `user_id`, across studios, in start order.
    pub async fn user_reservations(&self, user_id: Ulid) -> Result<Vec<Reservation>, EngineError> {
        let scope = ReservationScope::ForUser(user_id);
        let studio_ids: Vec<Ulid> = self.studios.iter().map(|e| *e.key()).collect();
        let mut out = Vec::new();
        for studio_id in studio_ids {
            out.extend(self.list_reservations(studio_id, scope).await?);
        }
        out.sort_by_key(|r| r.span.start);
        Ok(out)
    }

    pub async fn get_studio_info(&self, studio_id: Ulid) -> Result<StudioInfo, EngineError> {
        let guard = self.read_studio(studio_id).await?;
        let city = self
            .places
            .get(&guard.studio.place_id)
            .map(|p| p.city.clone())
            .unwrap_or_default();
        Ok(StudioInfo {
            studio: guard.studio.clone(),
            city,
            reservation_count: guard.reservations.len(),
        })
    }

    pub fn get_place(&self, id: Ulid) -> Option<Place> {
        self.places.get(&id).map(|e| e.value().clone())
    }

    /// Studios matching every criterion of `filter`.
    pub async fn search_studios(&self, filter: &StudioFilter) -> Result<Vec<StudioInfo>, EngineError> {
        let studio_ids: Vec<Ulid> = self.studios.iter().map(|e| *e.key()).collect();
        let mut out = Vec::new();
        for studio_id in studio_ids {
            let guard = self.read_studio(studio_id).await?;
            let Some(place) = self.get_place(guard.studio.place_id) else {
                continue;
            };
            if filter.matches(&guard.studio, &place) {
                out.push(StudioInfo {
                    studio: guard.studio.clone(),
                    city: place.city,
                    reservation_count: guard.reservations.len(),
                });
            }
        }
        out.sort_by(|a, b| a.studio.name.cmp(&b.studio.name).then(a.studio.id.cmp(&b.studio.id)));
        Ok(out)
    }

    /// Duration and cost of a reservation at its studio's current rate.
    pub async fn pricing_snapshot(&self, reservation_id: Ulid) -> Result<PricingSnapshot, EngineError> {
        let studio_id = self
            .studio_for_reservation(&reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        let guard = self.read_studio(studio_id).await?;
        let reservation = guard
            .get(reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        Ok(PricingSnapshot::compute(reservation, &guard.studio))
    }
}
