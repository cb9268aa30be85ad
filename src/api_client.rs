//! api_client.rs
//!
//! Внешние коллабораторы ядра и их HTTP-реализация.
//!
//! 1.  **SeatQuery / PaymentStatusSource**: интерфейсы запроса мест сеанса и статуса
//!     платежа. Ядро знает только их, поэтому в тестах их легко подменить.
//! 2.  **CircuitBreaker**: паттерн "Автоматический выключатель". После серии сбоев
//!     перестаём долбить неработающий API и ждём таймаут.
//! 3.  **ApiClient**: reqwest-клиент, реализующий оба интерфейса; каждый запрос
//!     проходит через `CircuitBreaker`.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{ApiConfig, CircuitBreakerConfig};
use crate::error::FetchError;
use crate::models::{PaymentStatusResponse, Seat};
use crate::{lock, read, write};

/// Полный запрос мест сеанса. Идемпотентен и без побочных эффектов.
#[async_trait]
pub trait SeatQuery: Send + Sync + 'static {
    async fn fetch_seats(&self, showtime_id: &str) -> Result<Vec<Seat>, FetchError>;
}

/// Запрос текущего статуса платежа.
#[async_trait]
pub trait PaymentStatusSource: Send + Sync + 'static {
    async fn fetch_payment_status(&self, payment_id: &str) -> Result<PaymentStatusResponse, FetchError>;
}

/// Состояния "Автоматического выключателя".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Нормальный режим работы, запросы разрешены.
    Closed,
    /// Запросы временно запрещены после серии сбоев.
    Open,
    /// Таймаут в Open истёк, пропускаем пробный запрос.
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    /// Счетчик последовательных сбоев.
    failure_count: AtomicU32,
    /// Момент последнего сбоя для расчета таймаута.
    last_failure: Mutex<Option<Instant>>,
    failure_threshold: u32,
    timeout_duration: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout_seconds: u64) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            last_failure: Mutex::new(None),
            failure_threshold: failure_threshold.max(1),
            timeout_duration: Duration::from_secs(timeout_seconds),
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.failure_threshold, config.timeout_seconds)
    }

    /// Проверяет, можно ли выполнить следующий запрос.
    pub fn can_execute(&self) -> bool {
        let state = *read(&self.state);

        match state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let last_failure = *lock(&self.last_failure);
                let elapsed = last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(self.timeout_duration);

                if elapsed >= self.timeout_duration {
                    *write(&self.state) = CircuitState::HalfOpen;
                    info!("Circuit breaker transitioning to HalfOpen state");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = write(&self.state);
        if *state == CircuitState::HalfOpen {
            info!("Circuit breaker recovered - transitioning to Closed state");
        }
        *state = CircuitState::Closed;
        self.failure_count.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        let failure_count = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        *lock(&self.last_failure) = Some(Instant::now());

        let mut state = write(&self.state);
        match *state {
            CircuitState::Closed if failure_count >= self.failure_threshold => {
                *state = CircuitState::Open;
                error!(
                    "Circuit breaker OPENED - {} failures reached threshold {}",
                    failure_count, self.failure_threshold
                );
            }
            // Пробный запрос провалился - обратно в Open
            CircuitState::HalfOpen => {
                *state = CircuitState::Open;
                warn!("Circuit breaker test failed - returning to Open state");
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        *read(&self.state)
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }
}

/// HTTP-клиент к API кинотеатра.
#[derive(Debug)]
pub struct ApiClient {
    base_url: String,
    http_client: reqwest::Client,
    circuit_breaker: CircuitBreaker,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration, circuit_breaker: CircuitBreaker) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
            circuit_breaker,
        })
    }

    pub fn from_config(api: &ApiConfig, breaker: &CircuitBreakerConfig) -> Result<Self, FetchError> {
        Self::new(
            api.base_url.clone(),
            Duration::from_secs(api.request_timeout_seconds),
            CircuitBreaker::from_config(breaker),
        )
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    /// GET с разбором JSON, пропущенный через Circuit Breaker.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        if !self.circuit_breaker.can_execute() {
            warn!(%path, "Circuit breaker is OPEN - blocking api request");
            return Err(FetchError::CircuitOpen);
        }

        let url = format!("{}{}", self.base_url, path);
        match self.send(&url).await {
            Ok(body) => {
                self.circuit_breaker.record_success();
                serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))
            }
            Err(e) => {
                // 4xx - это ответ сервиса, а не его отказ
                if e.is_retryable() {
                    self.circuit_breaker.record_failure();
                }
                warn!(%url, error = %e, "api request failed");
                Err(e)
            }
        }
    }

    async fn send(&self, url: &str) -> Result<String, FetchError> {
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl SeatQuery for ApiClient {
    async fn fetch_seats(&self, showtime_id: &str) -> Result<Vec<Seat>, FetchError> {
        let seats: Vec<Seat> = self.get_json(&format!("/showtimes/{}/seats", showtime_id)).await?;
        debug!(%showtime_id, seats = seats.len(), "fetched seat map");
        Ok(seats)
    }
}

#[async_trait]
impl PaymentStatusSource for ApiClient {
    async fn fetch_payment_status(&self, payment_id: &str) -> Result<PaymentStatusResponse, FetchError> {
        let status: PaymentStatusResponse =
            self.get_json(&format!("/payments/{}/status", payment_id)).await?;
        debug!(%payment_id, status = ?status.status, "fetched payment status");
        Ok(status)
    }
}
