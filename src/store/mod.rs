mod durable;
mod memory;

pub use durable::WalStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;
use ulid::Ulid;

use crate::model::{Calendar, Event, UserId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("calendar of {tutor_id} is at version {actual}, expected {expected}")]
    VersionMismatch {
        tutor_id: UserId,
        expected: u64,
        actual: u64,
    },
    #[error("event for tutor {event_tutor} sent to calendar of {tutor_id}")]
    Misrouted { tutor_id: UserId, event_tutor: UserId },
    #[error("storage I/O: {0}")]
    Io(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

/// Document persistence the engine is written against. The document is a
/// tutor's [`Calendar`]; every write is a single conditional append.
#[async_trait]
pub trait Store: Send + Sync {
    /// Snapshot of a tutor's calendar. Unknown tutors yield an empty calendar at version 0.
    async fn load(&self, tutor_id: UserId) -> Result<Calendar, StoreError>;

    /// Apply `event` iff the calendar is still at `expected_version`.
    /// Returns the new version.
    async fn commit(
        &self,
        tutor_id: UserId,
        expected_version: u64,
        event: Event,
    ) -> Result<u64, StoreError>;

    /// Owning tutor of a window or session.
    async fn locate(&self, entity_id: Ulid) -> Result<Option<UserId>, StoreError>;

    /// Sessions the student currently appears in as a participant.
    async fn sessions_for_student(&self, student_id: UserId) -> Result<Vec<Ulid>, StoreError>;
}

fn check_route(tutor_id: UserId, event: &Event) -> Result<(), StoreError> {
    let event_tutor = event.tutor_id();
    if event_tutor != tutor_id {
        return Err(StoreError::Misrouted {
            tutor_id,
            event_tutor,
        });
    }
    Ok(())
}
