#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use tokio::time::Instant;

use seat_sync::channel::{FrameStream, Transport};
use seat_sync::models::PaymentStatusResponse;
use seat_sync::{FetchError, PaymentStatusSource, Seat, SeatQuery, TransportError};

pub type FrameSender = UnboundedSender<Result<String, TransportError>>;

enum Step {
    Refuse,
    Accept(UnboundedReceiver<Result<String, TransportError>>),
}

/// Транспорт по сценарию: каждая попытка подключения берёт следующий шаг,
/// когда шаги кончились - соединение отклоняется.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    connects: Mutex<Vec<Instant>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refuse(&self) {
        self.script.lock().unwrap().push_back(Step::Refuse);
    }

    pub fn accept(&self) -> FrameSender {
        let (tx, rx) = unbounded();
        self.script.lock().unwrap().push_back(Step::Accept(rx));
        tx
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.connects.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, _showtime_id: &str) -> Result<FrameStream, TransportError> {
        self.connects.lock().unwrap().push(Instant::now());
        match self.script.lock().unwrap().pop_front() {
            Some(Step::Accept(rx)) => Ok(rx.boxed()),
            Some(Step::Refuse) | None => Err(TransportError::Connect("connection refused".into())),
        }
    }
}

pub fn frame(kind: &str, showtime_id: &str, seat_ids: &[&str]) -> Result<String, TransportError> {
    Ok(serde_json::json!({ "type": kind, "seatIds": seat_ids, "showtimeId": showtime_id }).to_string())
}

/// Отдаёт фиксированную схему зала и считает запросы.
pub struct StaticSeats {
    seats: Vec<Seat>,
    calls: AtomicUsize,
}

impl StaticSeats {
    pub fn new(ids: &[&str]) -> Arc<Self> {
        let seats = ids
            .iter()
            .enumerate()
            .map(|(i, id)| Seat::available(*id, &id[..1], i as u32 + 1))
            .collect();
        Arc::new(Self { seats, calls: AtomicUsize::new(0) })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SeatQuery for StaticSeats {
    async fn fetch_seats(&self, _showtime_id: &str) -> Result<Vec<Seat>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.seats.clone())
    }
}

/// Платёж, который никогда не завершается.
pub struct PendingPayments;

#[async_trait]
impl PaymentStatusSource for PendingPayments {
    async fn fetch_payment_status(&self, _payment_id: &str) -> Result<PaymentStatusResponse, FetchError> {
        Ok(PaymentStatusResponse::pending())
    }
}

pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

pub fn assert_gap(from: Instant, to: Instant, expected_ms: u64) {
    let gap = to.duration_since(from).as_millis() as u64;
    assert!(
        gap >= expected_ms && gap <= expected_ms + 5,
        "expected ~{expected_ms}ms between attempts, got {gap}ms"
    );
}
