use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::model::{SubjectId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationStatus {
    Pending,
    Active,
    Inactive,
}

/// A student's enrolment with a tutor for one subject. Owned outside the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub student_id: UserId,
    pub tutor_id: UserId,
    pub subject_id: SubjectId,
    pub status: RegistrationStatus,
}

/// Booking precondition lookup.
#[async_trait]
pub trait RegistrationLookup: Send + Sync {
    async fn has_active_registration(
        &self,
        student_id: UserId,
        tutor_id: UserId,
        subject_id: SubjectId,
    ) -> bool;
}

/// In-memory registrations keyed by `(student, tutor, subject)`.
#[derive(Default)]
pub struct RegistrationBook {
    entries: DashMap<(UserId, UserId, SubjectId), RegistrationStatus>,
}

impl RegistrationBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, registration: Registration) {
        self.entries.insert(
            (
                registration.student_id,
                registration.tutor_id,
                registration.subject_id,
            ),
            registration.status,
        );
    }

    pub fn activate(&self, student_id: UserId, tutor_id: UserId, subject_id: SubjectId) {
        self.upsert(Registration {
            student_id,
            tutor_id,
            subject_id,
            status: RegistrationStatus::Active,
        });
    }
}

#[async_trait]
impl RegistrationLookup for RegistrationBook {
    async fn has_active_registration(
        &self,
        student_id: UserId,
        tutor_id: UserId,
        subject_id: SubjectId,
    ) -> bool {
        self.entries
            .get(&(student_id, tutor_id, subject_id))
            .is_some_and(|status| *status == RegistrationStatus::Active)
    }
}
