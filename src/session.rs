//! Сессия одного экрана сеанса.
//!
//! Все компоненты ядра живут ровно одну сессию: создаются при входе на экран
//! и уничтожаются при выходе. Глобальных кешей по id сеанса нет.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api_client::{PaymentStatusSource, SeatQuery};
use crate::channel::{ConnectionState, EventChannel, ReconnectPolicy, Transport};
use crate::clock::{Clock, MonotonicClock};
use crate::config::Config;
use crate::error::{FetchError, HoldError, SelectionError};
use crate::models::{PaymentOutcome, Seat};
use crate::services::{
    refresh_seats, CountdownView, FallbackMode, HoldCountdown, PaymentHandlers,
    PaymentWatchSettings, PaymentWatcher, PollingFallback,
};
use crate::store::{ConflictTracker, SeatStateStore, Selection};
use crate::{lock, read, write};

/// Внешние коллабораторы сессии.
#[derive(Clone)]
pub struct SessionDeps {
    pub transport: Arc<dyn Transport>,
    pub seats: Arc<dyn SeatQuery>,
    pub payments: Arc<dyn PaymentStatusSource>,
    pub clock: Arc<dyn Clock>,
}

impl SessionDeps {
    pub fn new(
        transport: Arc<dyn Transport>,
        seats: Arc<dyn SeatQuery>,
        payments: Arc<dyn PaymentStatusSource>,
    ) -> Self {
        Self { transport, seats, payments, clock: Arc::new(MonotonicClock::new()) }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

pub struct ShowtimeSession {
    id: Uuid,
    showtime_id: String,
    deps: SessionDeps,
    warning_secs: u64,
    payment_settings: PaymentWatchSettings,
    channel: EventChannel,
    store: Arc<SeatStateStore>,
    conflicts: Arc<ConflictTracker>,
    selection: Arc<RwLock<Selection>>,
    fallback: PollingFallback,
    hold: Mutex<Option<HoldCountdown>>,
    payment: Mutex<Option<Arc<PaymentWatcher>>>,
    torn_down: AtomicBool,
}

impl ShowtimeSession {
    /// Первая полная загрузка мест, подписка моста на канал, подключение
    /// и запуск льготного таймера опроса. Ошибка загрузки возвращается вызывающему.
    pub async fn open(
        config: &Config,
        showtime_id: impl Into<String>,
        deps: SessionDeps,
    ) -> Result<Self, FetchError> {
        let showtime_id = showtime_id.into();
        let id = Uuid::new_v4();

        let store = Arc::new(SeatStateStore::new(showtime_id.clone()));
        let count = refresh_seats(deps.seats.as_ref(), &store).await?;

        let conflicts = Arc::new(ConflictTracker::new());
        let selection = Arc::new(RwLock::new(Selection::new()));
        let channel = EventChannel::new(
            showtime_id.clone(),
            deps.transport.clone(),
            ReconnectPolicy::from(&config.events),
        );

        // Мост канал -> хранилище -> конфликты. Снимается вместе со всеми при disconnect()
        {
            let store = store.clone();
            let conflicts = conflicts.clone();
            let selection = selection.clone();
            channel.subscribe(move |event| {
                store.apply_event(event);
                conflicts.track(event, &read(&selection));
            });
        }

        let fallback = PollingFallback::from_config(&config.polling);
        channel.connect();
        fallback.start(channel.watch_state(), deps.seats.clone(), store.clone());

        info!(session_id = %id, %showtime_id, seats = count, "showtime session opened");

        Ok(Self {
            id,
            showtime_id,
            deps,
            warning_secs: config.hold.warning_seconds,
            payment_settings: PaymentWatchSettings::from(&config.payment),
            channel,
            store,
            conflicts,
            selection,
            fallback,
            hold: Mutex::new(None),
            payment: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.id
    }

    pub fn showtime_id(&self) -> &str {
        &self.showtime_id
    }

    // === Места ===

    pub fn seats(&self) -> Vec<Seat> {
        self.store.snapshot()
    }

    pub fn store(&self) -> &Arc<SeatStateStore> {
        &self.store
    }

    pub fn seat_changes(&self) -> watch::Receiver<u64> {
        self.store.changes()
    }

    /// Ручной полный перезапрос мест.
    pub async fn refresh(&self) -> Result<usize, FetchError> {
        refresh_seats(self.deps.seats.as_ref(), &self.store).await
    }

    // === Соединение ===

    pub fn connection_state(&self) -> ConnectionState {
        self.channel.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.channel.watch_state()
    }

    /// Канал открыт и события приходят в реальном времени.
    pub fn is_live(&self) -> bool {
        self.channel.is_open()
    }

    pub fn fallback_mode(&self) -> FallbackMode {
        self.fallback.mode()
    }

    pub fn channel(&self) -> &EventChannel {
        &self.channel
    }

    // === Выбор и конфликты ===

    pub fn selection(&self) -> Selection {
        read(&self.selection).clone()
    }

    /// Выбрать можно только существующее свободное место.
    pub fn select_seat(&self, seat_id: &str) -> Result<bool, SelectionError> {
        match self.store.status_of(seat_id) {
            None => Err(SelectionError::UnknownSeat(seat_id.to_string())),
            Some(status) if !status.is_available() => Err(SelectionError::Unavailable {
                id: seat_id.to_string(),
                status,
            }),
            Some(_) => Ok(write(&self.selection).select(seat_id)),
        }
    }

    pub fn deselect_seat(&self, seat_id: &str) -> bool {
        write(&self.selection).deselect(seat_id)
    }

    pub fn clear_selection(&self) {
        write(&self.selection).clear();
    }

    pub fn conflicts(&self) -> BTreeSet<String> {
        self.conflicts.conflicts()
    }

    pub fn has_conflicts(&self) -> bool {
        self.conflicts.has_conflicts()
    }

    pub fn conflict_changes(&self) -> watch::Receiver<u64> {
        self.conflicts.changes()
    }

    pub fn clear_conflicts(&self) {
        self.conflicts.clear_conflicts();
    }

    // === Удержание ===

    /// Запускает отсчёт удержания; предыдущий отсчёт отменяется без колбэка.
    /// После `teardown()` ничего не делает.
    pub fn start_hold<F>(&self, expires_at: DateTime<Utc>, on_expire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_torn_down() {
            warn!(session_id = %self.id, "ignoring hold start on a torn down session");
            return;
        }
        let countdown = HoldCountdown::with_warning(
            self.deps.clock.clone(),
            expires_at,
            self.warning_secs,
            on_expire,
        );
        if let Some(previous) = lock(&self.hold).replace(countdown) {
            previous.cancel();
        }
        info!(session_id = %self.id, %expires_at, "seat hold started");
    }

    pub fn extend_hold(&self, expires_at: DateTime<Utc>) -> Result<(), HoldError> {
        match lock(&self.hold).as_ref() {
            Some(countdown) => countdown.restart(expires_at),
            None => Err(HoldError::NotStarted),
        }
    }

    pub fn hold(&self) -> Option<CountdownView> {
        lock(&self.hold).as_ref().map(HoldCountdown::view)
    }

    pub fn watch_hold(&self) -> Option<watch::Receiver<CountdownView>> {
        lock(&self.hold).as_ref().map(HoldCountdown::watch)
    }

    /// Бронь оплачена или отменена.
    pub fn cancel_hold(&self) {
        if let Some(countdown) = lock(&self.hold).take() {
            countdown.cancel();
        }
    }

    // === Платёж ===

    /// Начинает наблюдение за платежом; предыдущий наблюдатель останавливается.
    /// После `teardown()` ничего не делает.
    pub fn watch_payment(&self, payment_id: impl Into<String>, handlers: PaymentHandlers) {
        if self.is_torn_down() {
            warn!(session_id = %self.id, "ignoring payment watch on a torn down session");
            return;
        }
        let watcher = PaymentWatcher::start(
            payment_id,
            self.deps.payments.clone(),
            self.payment_settings,
            handlers,
        );
        if let Some(previous) = lock(&self.payment).replace(Arc::new(watcher)) {
            previous.stop();
        }
    }

    pub fn payment_outcome(&self) -> Option<PaymentOutcome> {
        lock(&self.payment).as_ref().map(|watcher| watcher.outcome())
    }

    pub fn watch_payment_outcome(&self) -> Option<watch::Receiver<PaymentOutcome>> {
        lock(&self.payment).as_ref().map(|watcher| watcher.watch())
    }

    /// Ручная повторная проверка текущего платежа. `None`, если платежа нет.
    pub async fn recheck_payment(&self) -> Option<Result<PaymentOutcome, FetchError>> {
        let watcher = lock(&self.payment).clone()?;
        Some(watcher.recheck().await)
    }

    // === Завершение ===

    /// Синхронно отменяет все таймеры и снимает всех подписчиков.
    /// Повторные вызовы ничего не делают.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.fallback.teardown();
        self.channel.disconnect();
        self.cancel_hold();
        if let Some(watcher) = lock(&self.payment).take() {
            watcher.stop();
        }
        info!(session_id = %self.id, showtime_id = %self.showtime_id, "showtime session torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }
}

impl Drop for ShowtimeSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
