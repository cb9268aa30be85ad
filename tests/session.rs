mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{advance, frame, PendingPayments, ScriptedTransport, StaticSeats};
use seat_sync::clock::{Clock, MonotonicClock};
use seat_sync::error::{HoldError, SelectionError};
use seat_sync::services::{FallbackMode, PaymentHandlers};
use seat_sync::{Config, ConnectionState, PaymentOutcome, SeatStatus, SessionDeps, ShowtimeSession};

struct Harness {
    transport: Arc<ScriptedTransport>,
    seats: Arc<StaticSeats>,
    clock: Arc<MonotonicClock>,
}

impl Harness {
    fn new() -> Self {
        Self {
            transport: ScriptedTransport::new(),
            seats: StaticSeats::new(&["A1", "A2", "B1"]),
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    async fn open(&self) -> ShowtimeSession {
        let deps = SessionDeps::new(self.transport.clone(), self.seats.clone(), Arc::new(PendingPayments))
            .with_clock(self.clock.clone());
        ShowtimeSession::open(&Config::default(), "st-1", deps).await.unwrap()
    }
}

fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    (count.clone(), count)
}

#[tokio::test(start_paused = true)]
async fn test_held_event_flags_selected_seat() {
    let harness = Harness::new();
    let frames = harness.transport.accept();
    let session = harness.open().await;
    advance(1).await;
    assert!(session.is_live());

    assert_eq!(session.select_seat("A1"), Ok(true));
    assert_eq!(session.select_seat("A2"), Ok(true));
    let conflicts = session.conflict_changes();

    frames.unbounded_send(frame("HELD", "st-1", &["A1"])).unwrap();
    advance(1).await;

    assert_eq!(session.store().status_of("A1"), Some(SeatStatus::Held));
    assert_eq!(session.store().status_of("A2"), Some(SeatStatus::Available));
    assert!(conflicts.has_changed().unwrap());
    assert_eq!(session.conflicts().into_iter().collect::<Vec<_>>(), vec!["A1".to_string()]);

    // освобождение не снимает конфликт, только явное подтверждение
    frames.unbounded_send(frame("RELEASED", "st-1", &["A1"])).unwrap();
    advance(1).await;
    assert_eq!(session.store().status_of("A1"), Some(SeatStatus::Available));
    assert!(session.has_conflicts());
    session.clear_conflicts();
    assert!(!session.has_conflicts());
}

#[tokio::test(start_paused = true)]
async fn test_selection_requires_available_seat() {
    let harness = Harness::new();
    let frames = harness.transport.accept();
    let session = harness.open().await;
    advance(1).await;

    frames.unbounded_send(frame("BOOKED", "st-1", &["B1"])).unwrap();
    advance(1).await;

    assert_eq!(session.select_seat("Z9"), Err(SelectionError::UnknownSeat("Z9".into())));
    assert!(matches!(
        session.select_seat("B1"),
        Err(SelectionError::Unavailable { status: SeatStatus::Booked, .. })
    ));
    assert_eq!(session.select_seat("A1"), Ok(true));
    assert_eq!(session.select_seat("A1"), Ok(false));
    assert!(session.deselect_seat("A1"));
    assert!(session.selection().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_polls_every_interval_when_channel_never_opens() {
    let harness = Harness::new();
    let session = harness.open().await;
    assert_eq!(harness.seats.calls(), 1);
    assert_eq!(session.fallback_mode(), FallbackMode::Grace);

    advance(2_001).await;
    assert_eq!(session.fallback_mode(), FallbackMode::Polling);
    assert!(!session.is_live());
    assert_eq!(harness.seats.calls(), 1);

    advance(8_000).await;
    assert_eq!(harness.seats.calls(), 2);
    advance(8_000).await;
    assert_eq!(harness.seats.calls(), 3);

    session.teardown();
    advance(60_000).await;
    assert_eq!(harness.seats.calls(), 3);
    assert_eq!(session.fallback_mode(), FallbackMode::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_open_channel_keeps_push_mode() {
    let harness = Harness::new();
    let _frames = harness.transport.accept();
    let session = harness.open().await;

    advance(30_000).await;
    assert_eq!(session.fallback_mode(), FallbackMode::Push);
    assert_eq!(harness.seats.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hold_expires_once_through_session() {
    let harness = Harness::new();
    let session = harness.open().await;
    assert_eq!(session.extend_hold(harness.clock.now()), Err(HoldError::NotStarted));

    let (fired, sink) = counter();
    session.start_hold(harness.clock.now() + chrono::Duration::seconds(3), move || {
        sink.fetch_add(1, Ordering::SeqCst);
    });
    // первый пересчёт сразу при старте
    advance(1).await;
    assert_eq!(session.hold().map(|v| v.remaining_secs), Some(3));
    advance(1_000).await;
    assert_eq!(session.hold().map(|v| v.remaining_secs), Some(2));
    assert!(session.hold().is_some_and(|v| v.warning));

    advance(2_000).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(session.hold().is_some_and(|v| v.expired));
    assert_eq!(
        session.extend_hold(harness.clock.now() + chrono::Duration::seconds(60)),
        Err(HoldError::Expired)
    );
}

#[tokio::test(start_paused = true)]
async fn test_payment_times_out_without_settlement() {
    let harness = Harness::new();
    let session = harness.open().await;

    let (timeouts, sink) = counter();
    session.watch_payment(
        "pay-1",
        PaymentHandlers::new().on_timeout(move || {
            sink.fetch_add(1, Ordering::SeqCst);
        }),
    );
    advance(60_000).await;
    assert_eq!(session.payment_outcome(), Some(PaymentOutcome::Pending));

    advance(61_000).await;
    assert_eq!(session.payment_outcome(), Some(PaymentOutcome::Timeout));
    assert_eq!(timeouts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_silences_everything() {
    let harness = Harness::new();
    let frames = harness.transport.accept();
    let session = harness.open().await;
    advance(1).await;

    let (hold_fired, hold_sink) = counter();
    session.start_hold(harness.clock.now() + chrono::Duration::seconds(5), move || {
        hold_sink.fetch_add(1, Ordering::SeqCst);
    });
    let (timeouts, timeout_sink) = counter();
    session.watch_payment(
        "pay-1",
        PaymentHandlers::new().on_timeout(move || {
            timeout_sink.fetch_add(1, Ordering::SeqCst);
        }),
    );
    assert!(session.select_seat("A1").is_ok());

    session.teardown();
    session.teardown();
    assert!(session.is_torn_down());
    assert_eq!(session.connection_state(), ConnectionState::Closed);
    assert_eq!(session.channel().subscriber_count(), 0);
    assert!(session.hold().is_none());
    assert!(session.payment_outcome().is_none());

    let _ = frames.unbounded_send(frame("HELD", "st-1", &["A1"]));
    advance(600_000).await;
    assert_eq!(hold_fired.load(Ordering::SeqCst), 0);
    assert_eq!(timeouts.load(Ordering::SeqCst), 0);
    assert_eq!(session.store().status_of("A1"), Some(SeatStatus::Available));
    assert!(!session.has_conflicts());
    assert_eq!(harness.seats.calls(), 1);
    assert_eq!(harness.transport.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timers_refused_after_teardown() {
    let harness = Harness::new();
    let session = harness.open().await;
    session.teardown();

    let (hold_fired, hold_sink) = counter();
    session.start_hold(harness.clock.now() + chrono::Duration::seconds(2), move || {
        hold_sink.fetch_add(1, Ordering::SeqCst);
    });
    let (timeouts, timeout_sink) = counter();
    session.watch_payment(
        "pay-2",
        PaymentHandlers::new().on_timeout(move || {
            timeout_sink.fetch_add(1, Ordering::SeqCst);
        }),
    );

    assert!(session.hold().is_none());
    assert!(session.payment_outcome().is_none());
    advance(300_000).await;
    assert_eq!(hold_fired.load(Ordering::SeqCst), 0);
    assert_eq!(timeouts.load(Ordering::SeqCst), 0);
}
