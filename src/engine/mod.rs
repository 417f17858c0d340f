mod admission;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use admission::{AdmissionRequest, ReservationPatch};
pub use conflict::{find_conflict, now_ms};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::config::Config;
use crate::lifecycle::{OverlapScope, ReservationState};
use crate::model::*;
use crate::wal::Wal;

pub type SharedStudioState = Arc<RwLock<StudioState>>;

/// Knobs the engine reads on every request.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Which existing reservations block an admission.
    pub overlap_scope: OverlapScope,
    /// Upper bound on waiting for a studio's critical section.
    pub lock_timeout: Duration,
    /// Longest admissible reservation in hours; `None` means unbounded.
    pub max_reservation_hours: Option<Ms>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            overlap_scope: OverlapScope::Active,
            lock_timeout: Duration::from_secs(5),
            max_reservation_hours: None,
        }
    }
}

impl From<&Config> for EngineOptions {
    fn from(config: &Config) -> Self {
        Self {
            overlap_scope: config.overlap_scope,
            lock_timeout: config.lock_timeout,
            max_reservation_hours: config.max_reservation_hours,
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// Appends from every studio share one fsync; each sender is answered only
/// after the batch containing its event is durable.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            wal.discard_pending();
            return Err(e);
        }
    }
    // A failed write is rolled back by the WAL, so every sender sees the same outcome.
    wal.flush_sync()
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let result = match wal.append_buffered(&event) {
                Ok(()) => wal.flush_sync(),
                Err(e) => {
                    wal.discard_pending();
                    Err(e)
                }
            };
            let _ = response.send(result);
        }
    }
}

/// The reservation store: catalog plus one locked reservation list per studio.
pub struct Engine {
    pub(super) places: DashMap<Ulid, Place>,
    pub(super) studios: DashMap<Ulid, SharedStudioState>,
    /// Reverse lookup: reservation id → studio id
    pub(super) reservation_to_studio: DashMap<Ulid, Ulid>,
    /// Serializes catalog writes with compaction.
    pub(super) catalog_lock: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) options: EngineOptions,
}

/// Apply a reservation or studio event to its studio (caller holds the lock).
fn apply_to_studio(ss: &mut StudioState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ReservationAdmitted {
            id,
            user_id,
            studio_id,
            option_id,
            coupon_id,
            span,
            created_at,
        } => {
            ss.insert_reservation(Reservation {
                id: *id,
                user_id: *user_id,
                studio_id: *studio_id,
                option_id: *option_id,
                coupon_id: *coupon_id,
                span: *span,
                state: ReservationState::Created,
                created_at: *created_at,
            });
            index.insert(*id, *studio_id);
        }
        Event::ReservationUpdated {
            id,
            option_id,
            coupon_id,
            span,
            ..
        } => {
            if let Some(mut r) = ss.remove_reservation(*id) {
                r.option_id = *option_id;
                r.coupon_id = *coupon_id;
                r.span = *span;
                ss.insert_reservation(r);
            }
        }
        Event::ReservationPaid { id, .. } => {
            if let Some(r) = ss.get_mut(*id) {
                r.state = ReservationState::Payed;
            }
        }
        Event::ReservationCancelled { id, .. } => {
            if let Some(r) = ss.get_mut(*id) {
                r.state = ReservationState::Cancel;
            }
        }
        Event::StudioUpdated { studio } => {
            ss.studio = studio.clone();
        }
        // Catalog creation is handled at the DashMap level, not here
        Event::PlaceCreated { .. } | Event::StudioCreated { .. } => {}
    }
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task.
    pub fn open(wal_path: PathBuf, options: EngineOptions) -> Result<Self, EngineError> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            places: DashMap::new(),
            studios: DashMap::new(),
            reservation_to_studio: DashMap::new(),
            catalog_lock: Mutex::new(()),
            wal_tx,
            options,
        };

        // We're the sole owner of these Arcs, so try_write never contends.
        for event in &events {
            match event {
                Event::PlaceCreated { place } => {
                    engine.places.insert(place.id, place.clone());
                }
                Event::StudioCreated { studio } => {
                    let ss = StudioState::new(studio.clone());
                    engine.studios.insert(studio.id, Arc::new(RwLock::new(ss)));
                }
                other => {
                    let Some(studio_id) = other.studio_id() else { continue };
                    let Some(rs) = engine.get_studio(&studio_id) else { continue };
                    let mut guard = rs
                        .try_write()
                        .map_err(|_| EngineError::Storage("replay: studio state contended".into()))?;
                    apply_to_studio(&mut guard, other, &engine.reservation_to_studio);
                }
            }
        }

        metrics::gauge!(crate::observability::STUDIOS_ACTIVE).set(engine.studios.len() as f64);
        tracing::debug!(
            "replayed {} events: {} places, {} studios, {} reservations",
            events.len(),
            engine.places.len(),
            engine.studios.len(),
            engine.reservation_to_studio.len()
        );
        Ok(engine)
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(EngineError::from)
    }

    pub fn get_studio(&self, id: &Ulid) -> Option<SharedStudioState> {
        self.studios.get(id).map(|e| e.value().clone())
    }

    pub fn studio_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_studio
            .get(reservation_id)
            .map(|e| *e.value())
    }

    /// WAL-append then apply, under the caller's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        ss: &mut StudioState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_studio(ss, event, &self.reservation_to_studio);
        Ok(())
    }

    /// Enter a studio's critical section. Waiting is bounded by `lock_timeout`.
    pub(super) async fn lock_studio(
        &self,
        studio_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<StudioState>, EngineError> {
        let rs = self
            .get_studio(&studio_id)
            .ok_or(EngineError::NotFound(studio_id))?;
        tokio::time::timeout(self.options.lock_timeout, rs.write_owned())
            .await
            .map_err(|_| EngineError::Storage(format!("timed out waiting for studio {studio_id}")))
    }

    pub(super) async fn read_studio(
        &self,
        studio_id: Ulid,
    ) -> Result<OwnedRwLockReadGuard<StudioState>, EngineError> {
        let rs = self
            .get_studio(&studio_id)
            .ok_or(EngineError::NotFound(studio_id))?;
        tokio::time::timeout(self.options.lock_timeout, rs.read_owned())
            .await
            .map_err(|_| EngineError::Storage(format!("timed out waiting for studio {studio_id}")))
    }

    /// Lookup reservation → studio, acquire the studio's write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<StudioState>, EngineError> {
        let studio_id = self
            .studio_for_reservation(reservation_id)
            .ok_or(EngineError::NotFound(*reservation_id))?;
        self.lock_studio(studio_id).await
    }
}
