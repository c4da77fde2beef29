use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use tutorbook::clock::FixedClock;
use tutorbook::engine::{Engine, EngineError, ErrorKind, SessionDraft, WindowDraft};
use tutorbook::model::{HOUR_MS, Ms, SessionStatus, SessionType, Span, WindowKind};
use tutorbook::notify::{NoticeKind, NotifyHub};
use tutorbook::registration::RegistrationBook;
use tutorbook::store::{MemoryStore, Store, WalStore};

// ── Test infrastructure ──────────────────────────────────────

/// 2024-03-04T00:00:00Z, a Monday.
const MONDAY: Ms = 1_709_510_400_000;

fn at(hour: i64) -> Ms {
    MONDAY + hour * HOUR_MS
}

struct World {
    engine: Arc<Engine>,
    registrations: Arc<RegistrationBook>,
    hub: Arc<NotifyHub>,
    tutor: Ulid,
    subject: Ulid,
}

fn world_on(store: Arc<dyn Store>) -> World {
    let registrations = Arc::new(RegistrationBook::new());
    let hub = Arc::new(NotifyHub::new());
    let engine = Engine::new(store, registrations.clone(), hub.clone())
        .with_clock(Arc::new(FixedClock::new(MONDAY - 24 * HOUR_MS)));
    World {
        engine: Arc::new(engine),
        registrations,
        hub,
        tutor: Ulid::new(),
        subject: Ulid::new(),
    }
}

fn world() -> World {
    world_on(Arc::new(MemoryStore::new()))
}

fn wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tutorbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(format!("{name}.wal"))
}

impl World {
    async fn weekly_monday(&self, from: i64, to: i64) {
        assert_ok!(
            self.engine
                .declare_availability(
                    self.tutor,
                    WindowDraft {
                        kind: WindowKind::Recurring { day_of_week: 1 },
                        start: from * HOUR_MS,
                        end: to * HOUR_MS,
                        max_slots: 10,
                    },
                )
                .await
        );
    }

    fn draft(&self, from: i64, to: i64, seats: u32) -> SessionDraft {
        SessionDraft {
            subject_id: self.subject,
            title: "Physics I".into(),
            start: at(from),
            end: at(to),
            session_type: SessionType::Online,
            meeting_link: Some("https://meet.example/phys".into()),
            location: None,
            max_participants: seats,
        }
    }

    fn student(&self) -> Ulid {
        let id = Ulid::new();
        self.registrations.activate(id, self.tutor, self.subject);
        id
    }
}

// ── Request → confirm → book → attend ────────────────────────

#[tokio::test]
async fn full_request_lifecycle() {
    let w = world();
    w.weekly_monday(9, 17).await;
    let requester = w.student();
    let mut tutor_rx = w.hub.subscribe(w.tutor);
    let mut requester_rx = w.hub.subscribe(requester);

    let pending = assert_ok!(
        w.engine
            .request_session(requester, w.tutor, w.draft(10, 12, 3))
            .await
    );
    assert_eq!(pending.status, SessionStatus::Pending);
    assert_eq!(tutor_rx.recv().await.unwrap().kind, NoticeKind::SessionRequested);

    // Not bookable until the tutor says yes.
    let err = assert_err!(w.engine.book_appointment(requester, pending.id).await);
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let confirmed = assert_ok!(w.engine.confirm_session(w.tutor, pending.id).await);
    assert_eq!(confirmed.status, SessionStatus::Confirmed);
    assert_eq!(requester_rx.recv().await.unwrap().kind, NoticeKind::SessionConfirmed);

    let booked = assert_ok!(w.engine.book_appointment(requester, pending.id).await);
    assert_eq!(booked.participants.len(), 1);

    assert_ok!(w.engine.start_session(w.tutor, pending.id).await);
    assert_ok!(
        w.engine
            .mark_attendance(w.tutor, pending.id, requester, true)
            .await
    );
    let done = assert_ok!(w.engine.complete_session(w.tutor, pending.id).await);
    assert!(done.participants[0].attended);
    assert!(assert_ok!(w.engine.attach_report(w.tutor, pending.id).await).has_report);
}

#[tokio::test]
async fn errors_carry_stable_kinds() {
    let w = world();
    w.weekly_monday(9, 12).await;

    let err = assert_err!(w.engine.open_session(w.tutor, w.draft(12, 13, 1)).await);
    assert!(matches!(err, EngineError::NotAvailable(_)));
    assert_eq!(err.kind().as_str(), "conflict");

    let mut unaligned = w.draft(9, 10, 1);
    unaligned.start += 15 * 60_000;
    let err = assert_err!(w.engine.open_session(w.tutor, unaligned).await);
    assert_eq!(err.kind().as_str(), "validation");

    let err = assert_err!(w.engine.cancel_session(w.tutor, Ulid::new()).await);
    assert_eq!(err.kind().as_str(), "not_found");

    let s = assert_ok!(w.engine.open_session(w.tutor, w.draft(9, 10, 1)).await);
    let err = assert_err!(w.engine.cancel_session(Ulid::new(), s.id).await);
    assert_eq!(err.kind().as_str(), "ownership");

    let err = assert_err!(w.engine.book_appointment(Ulid::new(), s.id).await);
    assert_eq!(err.kind().as_str(), "registration_required");
}

#[tokio::test]
async fn open_slots_track_bookable_time() {
    let w = world();
    w.weekly_monday(9, 13).await;
    let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
    assert_eq!(
        assert_ok!(w.engine.open_slots(w.tutor, date, None).await),
        vec![Span::new(at(9), at(13))]
    );

    assert_ok!(w.engine.open_session(w.tutor, w.draft(10, 11, 1)).await);
    assert_eq!(
        assert_ok!(w.engine.open_slots(w.tutor, date, None).await),
        vec![Span::new(at(9), at(10)), Span::new(at(11), at(13))]
    );
    assert_eq!(
        assert_ok!(w.engine.open_slots(w.tutor, date, Some(120)).await),
        vec![Span::new(at(11), at(13))]
    );
}

// ── Races on a multi-threaded runtime ────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn racing_requests_leave_one_committed_session() {
    let w = world();
    w.weekly_monday(9, 12).await;

    let mut tasks = Vec::new();
    for i in 0..16 {
        let engine = w.engine.clone();
        let tutor = w.tutor;
        // Overlapping two-hour and one-hour candidates all contending for 10:00.
        let draft = if i % 2 == 0 {
            w.draft(9, 11, 2)
        } else {
            w.draft(10, 11, 2)
        };
        tasks.push(tokio::spawn(async move {
            engine.request_session(Ulid::new(), tutor, draft).await
        }));
    }

    let mut winners = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::Conflict, "{e}"),
        }
    }
    assert_eq!(winners, 1);

    let day = assert_ok!(w.engine.sessions_between(w.tutor, at(0), at(24)).await);
    assert_eq!(day.len(), 1);
    assert_eq!(day[0].status, SessionStatus::Pending);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn racing_confirmations_transition_once() {
    let w = world();
    w.weekly_monday(9, 12).await;
    let requester = w.student();
    let mut requester_rx = w.hub.subscribe(requester);
    let pending = assert_ok!(
        w.engine
            .request_session(requester, w.tutor, w.draft(9, 10, 2))
            .await
    );

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let engine = w.engine.clone();
            let (tutor, sid) = (w.tutor, pending.id);
            tokio::spawn(async move { engine.confirm_session(tutor, sid).await })
        })
        .collect();
    let results = futures::future::join_all(tasks).await;
    assert_eq!(results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count(), 1);
    for r in &results {
        if let Ok(Err(e)) = r {
            assert!(matches!(e, EngineError::InvalidTransition { .. }), "{e}");
        }
    }

    assert_eq!(requester_rx.recv().await.unwrap().kind, NoticeKind::SessionConfirmed);
    assert!(requester_rx.try_recv().is_err());
    assert_eq!(
        assert_ok!(w.engine.session(pending.id).await).status,
        SessionStatus::Confirmed
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn racing_bookings_fill_exactly_to_capacity() {
    let w = world();
    w.weekly_monday(9, 12).await;
    let s = assert_ok!(w.engine.open_session(w.tutor, w.draft(9, 10, 5)).await);

    let students: Vec<Ulid> = (0..20).map(|_| w.student()).collect();
    let mut tasks = Vec::new();
    for student in students {
        let engine = w.engine.clone();
        let sid = s.id;
        tasks.push(tokio::spawn(async move {
            engine.book_appointment(student, sid).await
        }));
    }
    let results = futures::future::join_all(tasks).await;
    let booked = results
        .iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();
    assert_eq!(booked, 5);

    let session = assert_ok!(w.engine.session(s.id).await);
    assert_eq!(session.participants.len(), 5);
    let mut ids: Vec<Ulid> = session.participants.iter().map(|p| p.student_id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_student_racing_itself_books_once() {
    let w = world();
    w.weekly_monday(9, 12).await;
    let s = assert_ok!(w.engine.open_session(w.tutor, w.draft(9, 10, 10)).await);
    let student = w.student();

    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let engine = w.engine.clone();
            let sid = s.id;
            tokio::spawn(async move { engine.book_appointment(student, sid).await })
        })
        .collect();
    let results = futures::future::join_all(tasks).await;
    assert_eq!(results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().unwrap().as_ref().err())
            .all(|e| matches!(e, EngineError::AlreadyBooked { .. }))
    );
}

// ── Durability ───────────────────────────────────────────────

#[tokio::test]
async fn wal_backed_engine_survives_restart_and_compaction() {
    let path = wal_path("restart");
    let tutor = Ulid::new();
    let subject = Ulid::new();
    let student = Ulid::new();

    let session_id = {
        let store = Arc::new(assert_ok!(WalStore::open(&path, 3).await));
        let mut w = world_on(store.clone());
        w.tutor = tutor;
        w.subject = subject;
        w.registrations.activate(student, tutor, subject);
        w.weekly_monday(9, 12).await;
        let s = assert_ok!(w.engine.open_session(tutor, w.draft(9, 10, 2)).await);
        assert_ok!(w.engine.book_appointment(student, s.id).await);
        // Third append crossed the threshold.
        assert_eq!(store.appends_since_compact().await, 0);
        assert_ok!(w.engine.cancel_appointment(student, s.id).await);
        assert_ok!(w.engine.book_appointment(student, s.id).await);
        s.id
    };

    let store = Arc::new(assert_ok!(WalStore::open(&path, 3).await));
    let mut w = world_on(store);
    w.tutor = tutor;
    w.subject = subject;
    let s = assert_ok!(w.engine.session(session_id).await);
    assert_eq!(s.status, SessionStatus::Confirmed);
    assert_eq!(s.participants.len(), 1);
    assert_eq!(s.participants[0].student_id, student);
    let err = assert_err!(w.engine.open_session(tutor, w.draft(9, 11, 1)).await);
    assert!(matches!(err, EngineError::SlotConflict(_)));

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}
