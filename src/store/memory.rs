use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::{Store, StoreError, check_route};

pub type SharedCalendar = Arc<RwLock<Calendar>>;

/// Calendars held in memory, one lock per tutor.
pub struct MemoryStore {
    calendars: DashMap<UserId, SharedCalendar>,
    /// Reverse lookup: window/session id → tutor id
    entity_owner: DashMap<Ulid, UserId>,
    /// Student → sessions they are booked on.
    student_sessions: DashMap<UserId, HashSet<Ulid>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            calendars: DashMap::new(),
            entity_owner: DashMap::new(),
            student_sessions: DashMap::new(),
        }
    }

    pub fn tutor_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.calendars.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub(super) fn handle(&self, tutor_id: UserId) -> SharedCalendar {
        self.calendars
            .entry(tutor_id)
            .or_insert_with(|| Arc::new(RwLock::new(Calendar::new(tutor_id))))
            .value()
            .clone()
    }

    /// Apply a committed event and maintain the indexes. Caller holds the write lock.
    pub(super) fn apply_locked(&self, calendar: &mut Calendar, event: &Event) {
        calendar.apply(event);
        calendar.version += 1;
        match event {
            Event::WindowDeclared { window } => {
                self.entity_owner.insert(window.id, window.tutor_id);
            }
            Event::SessionCreated { session } => {
                self.entity_owner.insert(session.id, session.tutor_id);
                for p in &session.participants {
                    self.student_sessions
                        .entry(p.student_id)
                        .or_default()
                        .insert(session.id);
                }
            }
            Event::ParticipantAdded {
                session_id,
                participant,
                ..
            } => {
                self.student_sessions
                    .entry(participant.student_id)
                    .or_default()
                    .insert(*session_id);
            }
            Event::ParticipantRemoved {
                session_id,
                student_id,
                ..
            } => {
                if let Some(mut sessions) = self.student_sessions.get_mut(student_id) {
                    sessions.remove(session_id);
                }
            }
            _ => {}
        }
    }

    /// Rebuild state from a logged event, bypassing the version check.
    pub(super) async fn replay(&self, event: &Event) {
        let handle = self.handle(event.tutor_id());
        let mut guard = handle.write().await;
        self.apply_locked(&mut guard, event);
    }

    /// The minimal event sequence that recreates every calendar.
    pub(super) async fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        for tutor_id in self.tutor_ids() {
            let Some(handle) = self.calendars.get(&tutor_id).map(|e| e.value().clone()) else {
                continue;
            };
            let calendar = handle.read().await;
            for window in &calendar.windows {
                events.push(Event::WindowDeclared {
                    window: window.clone(),
                });
            }
            for session in &calendar.sessions {
                events.push(Event::SessionCreated {
                    session: session.clone(),
                });
            }
        }
        events
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load(&self, tutor_id: UserId) -> Result<Calendar, StoreError> {
        let handle = self.calendars.get(&tutor_id).map(|e| e.value().clone());
        match handle {
            Some(handle) => Ok(handle.read().await.clone()),
            None => Ok(Calendar::new(tutor_id)),
        }
    }

    async fn commit(
        &self,
        tutor_id: UserId,
        expected_version: u64,
        event: Event,
    ) -> Result<u64, StoreError> {
        check_route(tutor_id, &event)?;
        let handle = self.handle(tutor_id);
        let mut guard = handle.write().await;
        if guard.version != expected_version {
            return Err(StoreError::VersionMismatch {
                tutor_id,
                expected: expected_version,
                actual: guard.version,
            });
        }
        self.apply_locked(&mut guard, &event);
        Ok(guard.version)
    }

    async fn locate(&self, entity_id: Ulid) -> Result<Option<UserId>, StoreError> {
        Ok(self.entity_owner.get(&entity_id).map(|e| *e.value()))
    }

    async fn sessions_for_student(&self, student_id: UserId) -> Result<Vec<Ulid>, StoreError> {
        let mut ids: Vec<Ulid> = self
            .student_sessions
            .get(&student_id)
            .map(|e| e.value().iter().copied().collect())
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;

    #[tokio::test]
    async fn unknown_tutor_loads_empty_calendar() {
        let store = MemoryStore::new();
        let tutor = Ulid::new();
        let cal = store.load(tutor).await.unwrap();
        assert_eq!(cal, Calendar::new(tutor));
        assert!(store.tutor_ids().is_empty());
    }

    #[tokio::test]
    async fn commit_bumps_version_and_indexes_owner() {
        let store = MemoryStore::new();
        let tutor = Ulid::new();
        let w = window(tutor, WindowKind::Recurring { day_of_week: 1 }, Span::hours(9, 12));
        let wid = w.id;

        let v = store
            .commit(tutor, 0, Event::WindowDeclared { window: w })
            .await
            .unwrap();
        assert_eq!(v, 1);
        assert_eq!(store.locate(wid).await.unwrap(), Some(tutor));
        assert_eq!(store.load(tutor).await.unwrap().windows.len(), 1);
    }

    #[tokio::test]
    async fn stale_version_is_rejected_without_applying() {
        let store = MemoryStore::new();
        let tutor = Ulid::new();
        let first = session(tutor, Span::hours(9, 10), SessionStatus::Confirmed);
        let second = session(tutor, Span::hours(9, 10), SessionStatus::Confirmed);
        store
            .commit(tutor, 0, Event::SessionCreated { session: first })
            .await
            .unwrap();

        let result = store
            .commit(tutor, 0, Event::SessionCreated { session: second })
            .await;
        assert!(matches!(
            result,
            Err(StoreError::VersionMismatch {
                expected: 0,
                actual: 1,
                ..
            })
        ));
        assert_eq!(store.load(tutor).await.unwrap().sessions.len(), 1);
    }

    #[tokio::test]
    async fn misrouted_event_is_rejected() {
        let store = MemoryStore::new();
        let tutor = Ulid::new();
        let other = Ulid::new();
        let s = session(other, Span::hours(9, 10), SessionStatus::Confirmed);
        let result = store.commit(tutor, 0, Event::SessionCreated { session: s }).await;
        assert!(matches!(result, Err(StoreError::Misrouted { .. })));
    }

    #[tokio::test]
    async fn student_index_follows_participants() {
        let store = MemoryStore::new();
        let tutor = Ulid::new();
        let student = Ulid::new();
        let s = session(tutor, Span::hours(9, 10), SessionStatus::Confirmed);
        let sid = s.id;
        store
            .commit(tutor, 0, Event::SessionCreated { session: s })
            .await
            .unwrap();
        store
            .commit(
                tutor,
                1,
                Event::ParticipantAdded {
                    tutor_id: tutor,
                    session_id: sid,
                    participant: Participant {
                        student_id: student,
                        registered_at: 0,
                        attended: false,
                    },
                },
            )
            .await
            .unwrap();
        assert_eq!(store.sessions_for_student(student).await.unwrap(), vec![sid]);

        store
            .commit(
                tutor,
                2,
                Event::ParticipantRemoved {
                    tutor_id: tutor,
                    session_id: sid,
                    student_id: student,
                    at: 1,
                },
            )
            .await
            .unwrap();
        assert!(store.sessions_for_student(student).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshot_events_rebuild_the_same_calendar() {
        let store = MemoryStore::new();
        let tutor = Ulid::new();
        let mut w = window(tutor, WindowKind::Recurring { day_of_week: 3 }, Span::hours(8, 10));
        w.is_active = false;
        store
            .commit(tutor, 0, Event::WindowDeclared { window: w })
            .await
            .unwrap();
        store
            .commit(
                tutor,
                1,
                Event::SessionCreated {
                    session: session(tutor, Span::hours(9, 10), SessionStatus::Cancelled),
                },
            )
            .await
            .unwrap();

        let rebuilt = MemoryStore::new();
        for event in store.snapshot_events().await {
            rebuilt.replay(&event).await;
        }
        let a = store.load(tutor).await.unwrap();
        let b = rebuilt.load(tutor).await.unwrap();
        assert_eq!(a.windows, b.windows);
        assert_eq!(a.sessions, b.sessions);
    }
}
