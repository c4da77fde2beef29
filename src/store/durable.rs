use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{info, warn};
use ulid::Ulid;

use crate::model::{Calendar, Event, UserId};
use crate::observability;
use crate::wal::Wal;

use super::{MemoryStore, Store, StoreError, check_route};

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
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
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued (the batch window).
/// 3. One flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            warn!(path = %wal.path().display(), "WAL flush failed: {e}");
        }
        for (_, tx) in batch {
            let _ = tx.send(
                result
                    .as_ref()
                    .map(|_| ())
                    .map_err(|e| io::Error::new(e.kind(), e.to_string())),
            );
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so buffered bytes from this batch don't
    // leak into the next one.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
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
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// A [`MemoryStore`] whose commits are durably logged before they become visible.
pub struct WalStore {
    inner: MemoryStore,
    wal_tx: mpsc::Sender<WalCommand>,
    path: PathBuf,
    /// Commits hold it shared; compaction holds it exclusively so no event
    /// lands between the snapshot and the log swap.
    gate: RwLock<()>,
    compact_threshold: u64,
}

impl WalStore {
    /// Replay the log at `path` and start the writer task. Must run inside a Tokio runtime.
    pub async fn open(path: impl AsRef<Path>, compact_threshold: u64) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let replay = Wal::replay(&path)?;
        if replay.discarded_tail {
            warn!(path = %path.display(), "discarded torn entries at the end of the log");
        }
        let inner = MemoryStore::new();
        for event in &replay.events {
            inner.replay(event).await;
        }
        info!(
            path = %path.display(),
            events = replay.events.len(),
            tutors = inner.tutor_ids().len(),
            "replayed write-ahead log"
        );

        let wal = Wal::open(&path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            inner,
            wal_tx,
            path,
            gate: RwLock::new(()),
            compact_threshold,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tutor_ids(&self) -> Vec<UserId> {
        self.inner.tutor_ids()
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Io("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Io("WAL writer dropped response".into()))?
            .map_err(StoreError::from)
    }

    pub async fn appends_since_compact(&self) -> u64 {
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

    /// Rewrite the log with only the events needed to recreate the current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _gate = self.gate.write().await;
        self.compact_locked().await
    }

    async fn compact_locked(&self) -> Result<(), StoreError> {
        let events = self.inner.snapshot_events().await;
        let kept = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Io("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Io("WAL writer dropped response".into()))??;
        info!(path = %self.path.display(), events = kept, "compacted write-ahead log");
        Ok(())
    }

    async fn maybe_compact(&self) {
        if self.appends_since_compact().await < self.compact_threshold {
            return;
        }
        let _gate = self.gate.write().await;
        // Another commit may have compacted while we waited for the gate.
        if self.appends_since_compact().await < self.compact_threshold {
            return;
        }
        if let Err(e) = self.compact_locked().await {
            warn!(path = %self.path.display(), "compaction failed: {e}");
        }
    }
}

#[async_trait]
impl Store for WalStore {
    async fn load(&self, tutor_id: UserId) -> Result<Calendar, StoreError> {
        self.inner.load(tutor_id).await
    }

    async fn commit(
        &self,
        tutor_id: UserId,
        expected_version: u64,
        event: Event,
    ) -> Result<u64, StoreError> {
        check_route(tutor_id, &event)?;
        let version = {
            let _gate = self.gate.read().await;
            let handle = self.inner.handle(tutor_id);
            let mut guard = handle.write().await;
            if guard.version != expected_version {
                return Err(StoreError::VersionMismatch {
                    tutor_id,
                    expected: expected_version,
                    actual: guard.version,
                });
            }
            self.wal_append(&event).await?;
            self.inner.apply_locked(&mut guard, &event);
            guard.version
        };
        self.maybe_compact().await;
        Ok(version)
    }

    async fn locate(&self, entity_id: Ulid) -> Result<Option<UserId>, StoreError> {
        self.inner.locate(entity_id).await
    }

    async fn sessions_for_student(&self, student_id: UserId) -> Result<Vec<Ulid>, StoreError> {
        self.inner.sessions_for_student(student_id).await
    }
}
