use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub api: ApiConfig,
    pub events: EventsConfig,
    pub polling: PollingConfig,
    pub hold: HoldConfig,
    pub payment: PaymentWatchConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub environment: String,
    pub rust_log: String,
    pub showtime_id: Option<String>,
    pub payment_id: Option<String>,
}

// HTTP API: запрос мест и статуса платежа
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout_seconds: u64,
}

// Канал событий и политика переподключения
#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    pub ws_url: String,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub reconnect_max_attempts: u32,
}

// Деградация в режим опроса
#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    pub grace_ms: u64,
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HoldConfig {
    pub warning_seconds: u64,
}

// Наблюдение за платежом
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentWatchConfig {
    pub timeout_seconds: u64,
    pub poll_interval_ms: u64,
}

// Настройки Circuit Breaker
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

impl EventsConfig {
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }
}

impl PollingConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl PaymentWatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    /// Читает конфигурацию из переменных окружения (после `dotenvy::dotenv()`).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Собирает конфигурацию из произвольного источника ключей.
    /// Отсутствующий ключ - значение по умолчанию, мусор в числе - ошибка.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Config {
            app: AppConfig {
                environment: text("ENVIRONMENT", "development"),
                rust_log: text("RUST_LOG", "seat_sync=debug"),
                showtime_id: lookup("SHOWTIME_ID").filter(|v| !v.is_empty()),
                payment_id: lookup("PAYMENT_ID").filter(|v| !v.is_empty()),
            },
            api: ApiConfig {
                base_url: text("API_BASE_URL", "http://localhost:8000/api"),
                request_timeout_seconds: parse(&lookup, "API_REQUEST_TIMEOUT_SECONDS", 10)?,
            },
            events: EventsConfig {
                ws_url: text("EVENTS_WS_URL", "ws://localhost:8000/ws"),
                reconnect_base_delay_ms: parse(&lookup, "RECONNECT_BASE_DELAY_MS", 1_000)?,
                reconnect_max_delay_ms: parse(&lookup, "RECONNECT_MAX_DELAY_MS", 30_000)?,
                reconnect_max_attempts: parse(&lookup, "RECONNECT_MAX_ATTEMPTS", 5)?,
            },
            polling: PollingConfig {
                grace_ms: parse(&lookup, "POLLING_GRACE_MS", 2_000)?,
                interval_ms: parse(&lookup, "POLLING_INTERVAL_MS", 8_000)?,
            },
            hold: HoldConfig {
                warning_seconds: parse(&lookup, "HOLD_WARNING_SECONDS", 60)?,
            },
            payment: PaymentWatchConfig {
                timeout_seconds: parse(&lookup, "PAYMENT_TIMEOUT_SECONDS", 120)?,
                poll_interval_ms: parse(&lookup, "PAYMENT_POLL_INTERVAL_MS", 3_000)?,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: parse(&lookup, "CIRCUIT_BREAKER_FAILURE_THRESHOLD", 5)?,
                timeout_seconds: parse(&lookup, "CIRCUIT_BREAKER_TIMEOUT_SECONDS", 30)?,
            },
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        // Пустой источник: все ключи берутся по умолчанию, ошибок быть не может
        match Config::from_lookup(|_| None) {
            Ok(config) => config,
            Err(e) => unreachable!("defaults must parse: {e}"),
        }
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}
