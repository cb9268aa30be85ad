//! Деградация в режим опроса.
//!
//! Если канал событий не открылся за льготный период (или исчерпал попытки
//! переподключения), место push-уведомлений занимает полный перезапрос мест
//! с фиксированным интервалом. Из режима опроса выходим только при закрытии экрана.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api_client::SeatQuery;
use crate::channel::ConnectionState;
use crate::config::PollingConfig;
use crate::error::FetchError;
use crate::lock;
use crate::store::SeatStateStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackMode {
    /// Ещё не запущен или уже остановлен.
    Idle,
    /// Ждём, откроется ли канал за льготный период.
    Grace,
    /// Канал открыт вовремя, следим за исчерпанием переподключений.
    Push,
    Polling,
}

/// Один полный перезапрос мест с заменой коллекции в хранилище.
pub async fn refresh_seats(
    query: &dyn SeatQuery,
    store: &SeatStateStore,
) -> Result<usize, FetchError> {
    let seats = query.fetch_seats(store.showtime_id()).await?;
    let count = seats.len();
    store.initialize(seats);
    Ok(count)
}

pub struct PollingFallback {
    grace: Duration,
    interval: Duration,
    mode: Arc<watch::Sender<FallbackMode>>,
    polls: Arc<AtomicU64>,
    last_error: Arc<Mutex<Option<String>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingFallback {
    pub fn new(grace: Duration, interval: Duration) -> Self {
        let (mode, _) = watch::channel(FallbackMode::Idle);
        Self {
            grace,
            interval,
            mode: Arc::new(mode),
            polls: Arc::new(AtomicU64::new(0)),
            last_error: Arc::new(Mutex::new(None)),
            task: Mutex::new(None),
        }
    }

    pub fn from_config(config: &PollingConfig) -> Self {
        Self::new(config.grace(), config.interval())
    }

    /// Запускает льготный таймер. Вызывается сразу после `EventChannel::connect()`.
    pub fn start(
        &self,
        connection: watch::Receiver<ConnectionState>,
        query: Arc<dyn SeatQuery>,
        store: Arc<SeatStateStore>,
    ) {
        let mut task = lock(&self.task);
        if let Some(previous) = task.take() {
            previous.abort();
        }

        self.mode.send_replace(FallbackMode::Grace);
        let worker = FallbackWorker {
            grace: self.grace,
            interval: self.interval,
            mode: self.mode.clone(),
            polls: self.polls.clone(),
            last_error: self.last_error.clone(),
            connection,
            query,
            store,
        };
        *task = Some(tokio::spawn(worker.run()));
    }

    /// Детерминированно отменяет таймеры: после возврата опросов больше не будет.
    pub fn teardown(&self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
            debug!("polling fallback torn down");
        }
        self.mode.send_replace(FallbackMode::Idle);
    }

    pub fn mode(&self) -> FallbackMode {
        *self.mode.borrow()
    }

    pub fn is_polling(&self) -> bool {
        self.mode() == FallbackMode::Polling
    }

    pub fn watch_mode(&self) -> watch::Receiver<FallbackMode> {
        self.mode.subscribe()
    }

    /// Сколько опросов выполнено (успешных и нет).
    pub fn poll_count(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }

    /// Последняя ошибка опроса; сбрасывается успешным опросом.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }
}

impl Drop for PollingFallback {
    fn drop(&mut self) {
        self.teardown();
    }
}

struct FallbackWorker {
    grace: Duration,
    interval: Duration,
    mode: Arc<watch::Sender<FallbackMode>>,
    polls: Arc<AtomicU64>,
    last_error: Arc<Mutex<Option<String>>>,
    connection: watch::Receiver<ConnectionState>,
    query: Arc<dyn SeatQuery>,
    store: Arc<SeatStateStore>,
}

impl FallbackWorker {
    async fn run(mut self) {
        let showtime_id = self.store.showtime_id().to_string();

        tokio::time::sleep(self.grace).await;
        let state = *self.connection.borrow_and_update();
        if state == ConnectionState::Open {
            self.mode.send_replace(FallbackMode::Push);
            if !self.wait_for_exhaustion().await {
                return;
            }
            info!(%showtime_id, "seat event channel exhausted reconnects, switching to polling");
        } else {
            info!(%showtime_id, ?state, grace_ms = self.grace.as_millis() as u64, "seat event channel not open after grace, switching to polling");
        }

        self.mode.send_replace(FallbackMode::Polling);

        // Первый опрос через полный интервал после перехода
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.polls.fetch_add(1, Ordering::Relaxed);
            match refresh_seats(self.query.as_ref(), &self.store).await {
                Ok(count) => {
                    *lock(&self.last_error) = None;
                    debug!(%showtime_id, seats = count, "polled seat map");
                }
                Err(e) => {
                    warn!(%showtime_id, error = %e, retryable = e.is_retryable(), "seat poll failed");
                    *lock(&self.last_error) = Some(e.to_string());
                }
            }
        }
    }

    /// Ждёт, пока канал не закроется окончательно. `false`, если канал уничтожен.
    async fn wait_for_exhaustion(&mut self) -> bool {
        loop {
            if self.connection.changed().await.is_err() {
                return false;
            }
            if *self.connection.borrow_and_update() == ConnectionState::Closed {
                return true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Seat;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct CountingQuery {
        calls: AtomicU64,
        failing: AtomicBool,
    }

    #[async_trait]
    impl SeatQuery for CountingQuery {
        async fn fetch_seats(&self, _showtime_id: &str) -> Result<Vec<Seat>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(FetchError::Status(503));
            }
            Ok(vec![Seat::available("A1", "A", 1), Seat::available("A2", "A", 2)])
        }
    }

    impl CountingQuery {
        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn fallback() -> PollingFallback {
        PollingFallback::new(Duration::from_secs(2), Duration::from_secs(8))
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_every_interval_when_channel_never_opens() {
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let query = Arc::new(CountingQuery::default());
        let store = Arc::new(SeatStateStore::new("st-1"));
        let fallback = fallback();

        fallback.start(state_rx, query.clone(), store.clone());
        advance(1_999).await;
        assert_eq!(fallback.mode(), FallbackMode::Grace);

        advance(2).await;
        assert_eq!(fallback.mode(), FallbackMode::Polling);
        assert_eq!(query.calls(), 0);

        // grace 2s + интервал 8s
        advance(8_000).await;
        assert_eq!(query.calls(), 1);
        assert_eq!(store.len(), 2);

        advance(8_000).await;
        assert_eq!(query.calls(), 2);
        advance(8_000).await;
        assert_eq!(query.calls(), 3);

        fallback.teardown();
        advance(60_000).await;
        assert_eq!(query.calls(), 3);
        assert_eq!(fallback.mode(), FallbackMode::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_channel_suppresses_polling_until_exhausted() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let query = Arc::new(CountingQuery::default());
        let store = Arc::new(SeatStateStore::new("st-1"));
        let fallback = fallback();

        fallback.start(state_rx, query.clone(), store);
        advance(500).await;
        state_tx.send_replace(ConnectionState::Open);

        advance(60_000).await;
        assert_eq!(fallback.mode(), FallbackMode::Push);
        assert_eq!(query.calls(), 0);

        // обрыв с переподключением ещё не повод опрашивать
        state_tx.send_replace(ConnectionState::Reconnecting);
        advance(10_000).await;
        assert_eq!(query.calls(), 0);

        state_tx.send_replace(ConnectionState::Closed);
        advance(1).await;
        assert!(fallback.is_polling());
        advance(8_000).await;
        assert_eq!(query.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_errors_are_kept_and_polling_continues() {
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Reconnecting);
        let query = Arc::new(CountingQuery::default());
        query.failing.store(true, Ordering::SeqCst);
        let store = Arc::new(SeatStateStore::new("st-1"));
        let fallback = fallback();

        fallback.start(state_rx, query.clone(), store.clone());
        advance(10_001).await;
        assert_eq!(query.calls(), 1);
        assert!(fallback.last_error().is_some());
        assert!(store.is_empty());

        query.failing.store(false, Ordering::SeqCst);
        advance(8_000).await;
        assert_eq!(query.calls(), 2);
        assert!(fallback.last_error().is_none());
        assert_eq!(fallback.poll_count(), 2);
        assert_eq!(store.len(), 2);
    }
}
