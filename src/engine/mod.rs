mod availability;
mod booking;
mod conflict;
mod error;
mod queries;
mod scheduler;
mod validate;

pub use availability::{
    WindowDraft, WindowPatch, covering_windows, find_window_overlap, is_covered, merge_overlapping,
    open_slots, subtract_intervals,
};
pub use conflict::{Coverage, SessionOverlap, coverage, session_overlap};
pub use error::{EngineError, ErrorKind};
pub use scheduler::{SessionDraft, SessionPatch};
pub use validate::{validate_hour_aligned, validate_range};

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::config::SchedulingConfig;
use crate::model::*;
use crate::notify::{Notice, NoticeKind, Notifier};
use crate::observability::{self, COMMIT_RETRIES_TOTAL};
use crate::registration::RegistrationLookup;
use crate::store::{Store, StoreError};

/// The scheduling and booking engine. Stateless apart from its collaborators:
/// every operation reads a calendar snapshot from the [`Store`] and commits one
/// event conditionally on that snapshot's version.
pub struct Engine {
    pub(super) store: Arc<dyn Store>,
    pub(super) registrations: Arc<dyn RegistrationLookup>,
    pub(super) notifier: Arc<dyn Notifier>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) config: SchedulingConfig,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        registrations: Arc<dyn RegistrationLookup>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            registrations,
            notifier,
            clock: Arc::new(SystemClock),
            config: SchedulingConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: SchedulingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn config(&self) -> &SchedulingConfig {
        &self.config
    }

    pub(super) fn now(&self) -> Ms {
        self.clock.now()
    }

    /// Run `fut` as operation `op`, recording its outcome and latency.
    pub(super) async fn observe<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        let started = Instant::now();
        let result = fut.await;
        observability::record_operation(op, started, &result);
        result
    }

    /// One read-plan-commit cycle against a tutor's calendar.
    ///
    /// `plan` runs every guard against a snapshot and returns the event to
    /// commit plus the operation's result. The commit only lands if the
    /// calendar is still at the snapshot's version; otherwise the whole plan
    /// runs again on a fresh snapshot, so guards always see the state they
    /// commit against.
    pub(super) async fn transact<T>(
        &self,
        op: &'static str,
        tutor_id: UserId,
        mut plan: impl FnMut(&Calendar) -> Result<(Event, T), EngineError>,
    ) -> Result<T, EngineError> {
        let attempts = self.config.max_commit_attempts.max(1);
        for attempt in 1..=attempts {
            let calendar = self.store.load(tutor_id).await?;
            let (event, out) = plan(&calendar)?;
            match self.store.commit(tutor_id, calendar.version, event).await {
                Ok(_) => return Ok(out),
                Err(StoreError::VersionMismatch {
                    expected, actual, ..
                }) => {
                    debug!(op, tutor = %tutor_id, attempt, expected, actual, "calendar moved, replanning");
                    metrics::counter!(COMMIT_RETRIES_TOTAL, "op" => op).increment(1);
                }
                Err(e) => return Err(e.into()),
            }
        }
        warn!(op, tutor = %tutor_id, attempts, "gave up on contended calendar");
        Err(EngineError::Contention(tutor_id))
    }

    /// Tutor owning a window or session.
    pub(super) async fn owner_of(&self, entity_id: Ulid) -> Result<UserId, EngineError> {
        self.store
            .locate(entity_id)
            .await?
            .ok_or(EngineError::NotFound(entity_id))
    }

    /// Like [`owner_of`](Self::owner_of), but the caller must be that tutor.
    pub(super) async fn owned_by(&self, entity_id: Ulid, caller: UserId) -> Result<UserId, EngineError> {
        let owner = self.owner_of(entity_id).await?;
        if owner != caller {
            return Err(EngineError::OwnershipViolation {
                entity: entity_id,
                caller,
            });
        }
        Ok(owner)
    }

    pub(super) fn notify(
        &self,
        users: impl IntoIterator<Item = UserId>,
        kind: NoticeKind,
        session_id: Ulid,
    ) {
        let at = self.now();
        for user_id in users {
            self.notifier.notify(
                user_id,
                Notice {
                    kind: kind.clone(),
                    session_id,
                    at,
                },
            );
        }
    }
}
