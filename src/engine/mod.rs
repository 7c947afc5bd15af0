mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use conflict::{Conflict, conflicts, find_conflict};
pub use error::{Entity, ErrorKind, SchedulingError, StorageFailure};
pub use store::{Store, compact_events};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tracing::{error, info};

use crate::model::*;
use crate::wal::Wal;

pub type SharedVenueState = Arc<RwLock<VenueState>>;

/// Event counts before and after a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactStats {
    pub before: usize,
    pub after: usize,
}

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        response: oneshot::Sender<io::Result<CompactStats>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
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
    append_all(wal, batch.iter().map(|(event, _)| event))
}

/// Append and fsync as one unit. On failure the log is rolled back to its last
/// synced length, so nothing a caller was told failed can surface on replay.
fn append_all<'a>(wal: &mut Wal, events: impl IntoIterator<Item = &'a Event>) -> io::Result<()> {
    let result = events
        .into_iter()
        .try_for_each(|event| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err()
        && let Err(e) = wal.discard_pending()
    {
        error!("wal {}: rollback after failed write: {e}", wal.path().display());
    }
    result
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
        WalCommand::Compact { response } => {
            let _ = response.send(compact_log(wal));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let _ = response.send(append_all(wal, [&event]));
        }
    }
}

/// Fold the log on disk into its minimal form. Runs on the writer task,
/// after every earlier append has been flushed, so the file is complete.
fn compact_log(wal: &mut Wal) -> io::Result<CompactStats> {
    let events = Wal::replay(wal.path())?;
    let compacted = compact_events(&events);
    Wal::write_compact_file(wal.path(), &compacted)?;
    wal.swap_compact_file()?;
    Ok(CompactStats {
        before: events.len(),
        after: compacted.len(),
    })
}

async fn send_append(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> io::Result<()> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| io::Error::other("WAL writer shut down"))?;
    rx.await
        .map_err(|_| io::Error::other("WAL writer dropped response"))?
}

/// The scheduling coordinator: venue registry, bookings and recurring series
/// over a WAL-backed in-memory store.
pub struct Engine {
    store: Arc<Store>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    /// Replay the log at `wal_path` and start the writer task.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        // Rewrite what replayed cleanly so a torn tail can't shadow later appends.
        Wal::write_compact_file(&wal_path, &events)?;
        let mut wal = Wal::open(&wal_path)?;
        wal.swap_compact_file()?;

        let store = Store::new();
        store.replay(&events);
        info!(
            "replayed {} events from {}: {} venues, {} bookings, {} series",
            events.len(),
            wal_path.display(),
            store.venue_count(),
            store.booking_count(),
            store.series_count()
        );
        metrics::gauge!(crate::observability::BOOKINGS_ACTIVE).set(store.booking_count() as f64);

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            store: Arc::new(store),
            wal_tx,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Take the write lock of one venue. Fails if the venue is gone, including
    /// when it was deleted while we waited.
    pub(super) async fn lock_venue(
        &self,
        id: VenueId,
    ) -> Result<OwnedRwLockWriteGuard<VenueState>, SchedulingError> {
        let rs = self
            .store
            .get_venue(id)
            .ok_or(SchedulingError::NotFound(Entity::Venue, id))?;
        let guard = rs.write_owned().await;
        if !self.store.contains_venue(id) {
            return Err(SchedulingError::NotFound(Entity::Venue, id));
        }
        Ok(guard)
    }

    /// Lock several venues in ascending id order. Returned guards follow that order.
    pub(super) async fn lock_venues(
        &self,
        ids: &[VenueId],
    ) -> Result<Vec<OwnedRwLockWriteGuard<VenueState>>, SchedulingError> {
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut guards = Vec::with_capacity(sorted.len());
        for id in sorted {
            guards.push(self.lock_venue(id).await?);
        }
        Ok(guards)
    }

    /// Make `event` durable, then apply it under `guards`.
    ///
    /// Runs in its own task holding the guards: dropping the caller's future
    /// before this point writes nothing, and after it the commit always finishes.
    pub(super) async fn commit(
        &self,
        mut guards: Vec<OwnedRwLockWriteGuard<VenueState>>,
        event: Event,
        failure: StorageFailure,
    ) -> Result<(), SchedulingError> {
        let store = self.store.clone();
        let wal_tx = self.wal_tx.clone();
        let task = tokio::spawn(async move {
            send_append(&wal_tx, &event).await?;
            let mut views: Vec<&mut VenueState> = guards.iter_mut().map(|g| &mut **g).collect();
            store.apply_committed(&mut views, &event);
            metrics::gauge!(crate::observability::BOOKINGS_ACTIVE)
                .set(store.booking_count() as f64);
            Ok::<(), io::Error>(())
        });
        match task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("commit failed ({failure:?}): {e}");
                Err(SchedulingError::Storage(failure))
            }
            Err(e) => {
                error!("commit task aborted ({failure:?}): {e}");
                Err(SchedulingError::Storage(failure))
            }
        }
    }

    /// Rewrite the log with the minimal event set reproducing the current state.
    pub async fn compact(&self) -> Result<CompactStats, SchedulingError> {
        let (tx, rx) = oneshot::channel();
        let sent = self.wal_tx.send(WalCommand::Compact { response: tx }).await;
        let result = match sent {
            Ok(()) => rx
                .await
                .unwrap_or_else(|_| Err(io::Error::other("WAL writer dropped response"))),
            Err(_) => Err(io::Error::other("WAL writer shut down")),
        };
        match result {
            Ok(stats) => {
                info!("compacted log: {} -> {} events", stats.before, stats.after);
                Ok(stats)
            }
            Err(e) => {
                error!("compaction failed: {e}");
                Err(SchedulingError::Storage(StorageFailure::Compact))
            }
        }
    }

    /// Appends since the last compaction. Zero if the writer is gone.
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
