use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Ms, UserId};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NoticeKind {
    SessionRequested,
    SessionConfirmed,
    SessionRejected { reason: String },
    SessionUpdated,
    SessionCancelled,
    AppointmentBooked { student_id: UserId },
    AppointmentCancelled { student_id: UserId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub session_id: Ulid,
    pub at: Ms,
}

/// Fire-and-forget delivery of engine notices. Implementations must not block
/// and cannot fail the operation that emitted the notice.
pub trait Notifier: Send + Sync {
    fn notify(&self, user_id: UserId, notice: Notice);
}

/// Discards every notice.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _user_id: UserId, _notice: Notice) {}
}

/// In-process broadcast hub, one channel per user.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<UserId, broadcast::Sender<Notice>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a user's notices. Creates the channel if needed.
    pub fn subscribe(&self, user_id: UserId) -> broadcast::Receiver<Notice> {
        self.channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drop a user's channel; current receivers see the channel close.
    pub fn remove(&self, user_id: &UserId) {
        self.channels.remove(user_id);
    }
}

impl Notifier for NotifyHub {
    /// No-op if nobody is listening.
    fn notify(&self, user_id: UserId, notice: Notice) {
        if let Some(sender) = self.channels.get(&user_id) {
            let _ = sender.send(notice);
        }
    }
}
