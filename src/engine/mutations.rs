use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::lifecycle::ReservationState;
use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, WalCommand};

fn check_len(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.chars().count() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn validate_studio(studio: &Studio) -> Result<(), EngineError> {
    if studio.name.trim().is_empty() {
        return Err(EngineError::Invalid("studio name is required"));
    }
    check_len(&studio.name, MAX_STUDIO_NAME_LEN, "studio name too long")?;
    if let Some(d) = &studio.description {
        check_len(d, MAX_DESCRIPTION_LEN, "studio description too long")?;
    }
    Ok(())
}

impl Engine {
    pub async fn create_place(&self, place: Place) -> Result<(), EngineError> {
        if self.places.len() >= MAX_PLACES {
            return Err(EngineError::LimitExceeded("too many places"));
        }
        let _catalog = self.catalog_lock.lock().await;
        if place.name.trim().is_empty() {
            return Err(EngineError::Invalid("place name is required"));
        }
        check_len(&place.name, MAX_PLACE_NAME_LEN, "place name too long")?;
        check_len(&place.city, MAX_CITY_LEN, "city too long")?;
        if let Some(a) = &place.address {
            check_len(a, MAX_ADDRESS_LEN, "address too long")?;
        }
        if self.places.contains_key(&place.id) {
            return Err(EngineError::AlreadyExists(place.id));
        }

        let event = Event::PlaceCreated { place: place.clone() };
        self.wal_append(&event).await?;
        info!("created place {} in {}", place.id, place.city);
        self.places.insert(place.id, place);
        Ok(())
    }

    pub async fn create_studio(&self, studio: Studio) -> Result<(), EngineError> {
        if self.studios.len() >= MAX_STUDIOS {
            return Err(EngineError::LimitExceeded("too many studios"));
        }
        validate_studio(&studio)?;
        let _catalog = self.catalog_lock.lock().await;
        if !self.places.contains_key(&studio.place_id) {
            return Err(EngineError::NotFound(studio.place_id));
        }
        if self.studios.contains_key(&studio.id) {
            return Err(EngineError::AlreadyExists(studio.id));
        }

        let event = Event::StudioCreated { studio: studio.clone() };
        self.wal_append(&event).await?;
        info!("created studio {} at place {}", studio.id, studio.place_id);
        self.studios
            .insert(studio.id, Arc::new(RwLock::new(StudioState::new(studio))));
        metrics::gauge!(crate::observability::STUDIOS_ACTIVE).set(self.studios.len() as f64);
        Ok(())
    }

    /// Replace a studio's attributes. A studio never moves to another place.
    pub async fn update_studio(&self, studio: Studio) -> Result<(), EngineError> {
        validate_studio(&studio)?;
        let mut guard = self.lock_studio(studio.id).await?;
        if guard.studio.place_id != studio.place_id {
            return Err(EngineError::Invalid("studio place cannot change"));
        }
        let event = Event::StudioUpdated { studio };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Payment collaborator hook: `created` → `payed`.
    pub async fn confirm_payment(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.transition(id, ReservationState::Payed).await
    }

    /// Cancellation flow: `created`/`payed` → `cancel`. The slot is freed immediately.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.transition(id, ReservationState::Cancel).await
    }

    async fn transition(&self, id: Ulid, to: ReservationState) -> Result<Reservation, EngineError> {
        let mut guard = self.resolve_reservation_write(&id).await?;
        let current = guard.get(id).ok_or(EngineError::NotFound(id))?;
        let (from, studio_id) = (current.state, current.studio_id);
        if !from.can_transition_to(to) {
            return Err(EngineError::InvalidTransition { id, from, to });
        }

        let event = match to {
            ReservationState::Payed => Event::ReservationPaid { id, studio_id },
            ReservationState::Cancel => Event::ReservationCancelled { id, studio_id },
            ReservationState::Created => return Err(EngineError::InvalidTransition { id, from, to }),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
        info!("reservation {id}: {from} -> {to}");
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Hold the catalog lock and every studio's read lock until the swap,
        // so no append lands between the snapshot and the rewrite.
        let _catalog = self.catalog_lock.lock().await;
        let mut events: Vec<Event> = self
            .places
            .iter()
            .map(|e| Event::PlaceCreated { place: e.value().clone() })
            .collect();

        let studios: Vec<_> = self.studios.iter().map(|e| e.value().clone()).collect();
        let mut reservation_events = Vec::new();
        let mut guards = Vec::with_capacity(studios.len());
        for rs in studios {
            let guard = rs.read_owned().await;
            events.push(Event::StudioCreated { studio: guard.studio.clone() });
            for r in &guard.reservations {
                reservation_events.push(Event::ReservationAdmitted {
                    id: r.id,
                    user_id: r.user_id,
                    studio_id: r.studio_id,
                    option_id: r.option_id,
                    coupon_id: r.coupon_id,
                    span: r.span,
                    created_at: r.created_at,
                });
                match r.state {
                    ReservationState::Created => {}
                    ReservationState::Payed => reservation_events.push(Event::ReservationPaid {
                        id: r.id,
                        studio_id: r.studio_id,
                    }),
                    ReservationState::Cancel => {
                        reservation_events.push(Event::ReservationCancelled {
                            id: r.id,
                            studio_id: r.studio_id,
                        })
                    }
                }
            }
            guards.push(guard);
        }
        events.extend(reservation_events);

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))??;
        drop(guards);
        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
