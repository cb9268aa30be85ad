//! Таксономия ошибок ядра синхронизации.
//!
//! Ни одна из этих ошибок не фатальна: транспортные ошибки лечатся переподключением,
//! ошибки декодирования молча отбрасываются, ошибки запросов возвращаются вызывающему
//! как повторяемые, а таймаут платежа вообще не ошибка, а отдельное терминальное состояние.

use thiserror::Error;

/// Соединение с транспортом событий не установлено или оборвалось.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to event transport: {0}")]
    Connect(String),
    #[error("event transport closed by peer")]
    Closed,
    #[error("event transport error: {0}")]
    Io(String),
}

/// Фрейм не удалось разобрать в `SeatEvent`.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed seat event: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("event for showtime {actual} delivered to channel for {expected}")]
    ForeignShowtime { expected: String, actual: String },
}

/// Запрос к внешнему сервису (места, статус платежа) завершился неудачей.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Автоматический выключатель разомкнут, запрос даже не отправлялся.
    #[error("circuit breaker is open - api temporarily unavailable")]
    CircuitOpen,
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response status {0}")]
    Status(u16),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl FetchError {
    /// 4xx (кроме 408/429) повторять бессмысленно, всё остальное - можно.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status(code) => !(400..500).contains(code) || *code == 408 || *code == 429,
            _ => true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("seat {0} does not exist in this showtime")]
    UnknownSeat(String),
    #[error("seat {id} is not available ({status})")]
    Unavailable {
        id: String,
        status: crate::models::SeatStatus,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HoldError {
    #[error("hold has already expired")]
    Expired,
    #[error("no hold is running")]
    NotStarted,
}
