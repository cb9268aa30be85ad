//! payment.rs
//!
//! Наблюдение за расчётом платежа.
//!
//! PENDING -> {SUCCESS, FAILED, TIMEOUT}. Статус опрашивается через
//! `PaymentStatusSource`, с момента создания идёт таймер таймаута. Побеждает первый
//! терминальный переход: поздний ответ не перетирает TIMEOUT и наоборот.
//! TIMEOUT - это "неизвестно, обратитесь в поддержку", а не отказ.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{info, warn};

use crate::api_client::PaymentStatusSource;
use crate::config::PaymentWatchConfig;
use crate::error::FetchError;
use crate::lock;
use crate::models::{PaymentOutcome, PaymentStatusResponse};

type DetailHandler = Arc<dyn Fn(Option<&str>) + Send + Sync>;
type TimeoutHandler = Arc<dyn Fn() + Send + Sync>;

/// Колбэки терминальных исходов. Все необязательные.
#[derive(Clone, Default)]
pub struct PaymentHandlers {
    on_success: Option<DetailHandler>,
    on_failure: Option<DetailHandler>,
    on_timeout: Option<TimeoutHandler>,
}

impl PaymentHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Получает id транзакции, если сервис его прислал.
    pub fn on_success<F>(mut self, handler: F) -> Self
    where
        F: Fn(Option<&str>) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(handler));
        self
    }

    /// Получает причину отказа, если она есть.
    pub fn on_failure<F>(mut self, handler: F) -> Self
    where
        F: Fn(Option<&str>) + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(handler));
        self
    }

    pub fn on_timeout<F>(mut self, handler: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_timeout = Some(Arc::new(handler));
        self
    }

    fn notify(&self, outcome: &PaymentOutcome) {
        match outcome {
            PaymentOutcome::Success { transaction_id } => {
                if let Some(handler) = &self.on_success {
                    handler(transaction_id.as_deref());
                }
            }
            PaymentOutcome::Failed { reason } => {
                if let Some(handler) = &self.on_failure {
                    handler(reason.as_deref());
                }
            }
            PaymentOutcome::Timeout => {
                if let Some(handler) = &self.on_timeout {
                    handler();
                }
            }
            PaymentOutcome::Pending => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentWatchSettings {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for PaymentWatchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(3),
        }
    }
}

impl From<&PaymentWatchConfig> for PaymentWatchSettings {
    fn from(config: &PaymentWatchConfig) -> Self {
        Self {
            timeout: config.timeout(),
            poll_interval: config.poll_interval(),
        }
    }
}

struct WatchShared {
    payment_id: String,
    source: Arc<dyn PaymentStatusSource>,
    handlers: PaymentHandlers,
    poll_interval: Duration,
    // Дедлайн фиксируется при создании и не сдвигается повторной проверкой
    deadline: Instant,
    outcome: watch::Sender<PaymentOutcome>,
    last_error: Mutex<Option<String>>,
}

impl WatchShared {
    /// Терминальный переход, только если ещё PENDING. `true`, если переход случился.
    fn settle(&self, outcome: PaymentOutcome) -> bool {
        let settled = self.outcome.send_if_modified(|current| {
            if current.is_pending() {
                *current = outcome.clone();
                true
            } else {
                false
            }
        });

        if settled {
            match &outcome {
                PaymentOutcome::Timeout => warn!(payment_id = %self.payment_id, "payment watch timed out, outcome unknown"),
                other => info!(payment_id = %self.payment_id, outcome = ?other, "payment settled"),
            }
            self.handlers.notify(&outcome);
        }
        settled
    }

    /// Применяет результат запроса. `true`, если наблюдение закончено.
    fn apply(&self, result: Result<PaymentStatusResponse, FetchError>) -> Result<bool, FetchError> {
        match result {
            Ok(response) => {
                *lock(&self.last_error) = None;
                match response.outcome() {
                    Some(outcome) => {
                        self.settle(outcome);
                        Ok(true)
                    }
                    None => Ok(!self.outcome.borrow().is_pending()),
                }
            }
            Err(e) => {
                *lock(&self.last_error) = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn observe(self: Arc<Self>) {
        let timeout = sleep_until(self.deadline);
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                biased;
                _ = &mut timeout => {
                    self.settle(PaymentOutcome::Timeout);
                    return;
                }
                result = self.source.fetch_payment_status(&self.payment_id) => {
                    match self.apply(result) {
                        Ok(true) => return,
                        Ok(false) => {}
                        Err(e) => warn!(payment_id = %self.payment_id, error = %e, "payment status check failed, will retry"),
                    }
                }
            }

            tokio::select! {
                biased;
                _ = &mut timeout => {
                    self.settle(PaymentOutcome::Timeout);
                    return;
                }
                _ = sleep(self.poll_interval) => {}
            }
        }
    }
}

pub struct PaymentWatcher {
    shared: Arc<WatchShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PaymentWatcher {
    /// Создаёт наблюдатель и сразу запускает таймер таймаута и первый опрос.
    pub fn start(
        payment_id: impl Into<String>,
        source: Arc<dyn PaymentStatusSource>,
        settings: PaymentWatchSettings,
        handlers: PaymentHandlers,
    ) -> Self {
        let (outcome, _) = watch::channel(PaymentOutcome::Pending);
        let shared = Arc::new(WatchShared {
            payment_id: payment_id.into(),
            source,
            handlers,
            poll_interval: settings.poll_interval,
            deadline: Instant::now() + settings.timeout,
            outcome,
            last_error: Mutex::new(None),
        });
        info!(payment_id = %shared.payment_id, timeout_secs = settings.timeout.as_secs(), "watching payment");

        let task = tokio::spawn(shared.clone().observe());
        Self { shared, task: Mutex::new(Some(task)) }
    }

    pub fn payment_id(&self) -> &str {
        &self.shared.payment_id
    }

    pub fn outcome(&self) -> PaymentOutcome {
        self.shared.outcome.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<PaymentOutcome> {
        self.shared.outcome.subscribe()
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.shared.last_error).clone()
    }

    /// Ручная повторная проверка.
    ///
    /// SUCCESS и TIMEOUT не меняются. Один запрос выполняется сразу; его ошибка
    /// возвращается вызывающему как повторяемая, исход при этом не меняется.
    /// После ответа FAILED открывается заново с прежним дедлайном. Если статус
    /// всё ещё PENDING, а дедлайн прошёл, исход становится TIMEOUT, иначе фоновое
    /// наблюдение продолжается.
    pub async fn recheck(&self) -> Result<PaymentOutcome, FetchError> {
        let current = self.outcome();
        if matches!(current, PaymentOutcome::Success { .. } | PaymentOutcome::Timeout) {
            return Ok(current);
        }

        let response = match self.shared.source.fetch_payment_status(&self.shared.payment_id).await {
            Ok(response) => response,
            Err(e) => {
                *lock(&self.shared.last_error) = Some(e.to_string());
                return Err(e);
            }
        };
        *lock(&self.shared.last_error) = None;

        // Дальше ожиданий нет: брошенный future не оставит PENDING без наблюдателя
        let reopened = self.shared.outcome.send_if_modified(|current| {
            if matches!(current, PaymentOutcome::Failed { .. }) {
                *current = PaymentOutcome::Pending;
                true
            } else {
                false
            }
        });
        if reopened {
            info!(payment_id = %self.shared.payment_id, "re-checking failed payment");
        }

        match response.outcome() {
            Some(outcome) => {
                self.shared.settle(outcome);
            }
            None if !self.outcome().is_pending() => {}
            None if Instant::now() >= self.shared.deadline => {
                self.shared.settle(PaymentOutcome::Timeout);
            }
            None => self.ensure_observing(),
        }

        Ok(self.outcome())
    }

    /// Останавливает опрос и таймер таймаута без перехода состояния.
    pub fn stop(&self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
    }

    fn ensure_observing(&self) {
        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        *task = Some(tokio::spawn(self.shared.clone().observe()));
    }
}

impl Drop for PaymentWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
