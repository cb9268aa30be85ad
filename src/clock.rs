use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Источник текущего времени для вычислений по абсолютным дедлайнам.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Системные часы как есть.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Стенное время, зафиксированное при создании и продвигаемое монотонными часами tokio.
///
/// Переводы системных часов не сдвигают обратный отсчёт, а в тестах с
/// `start_paused = true` часы идут вместе с виртуальным временем tokio.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    wall: DateTime<Utc>,
    started: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::anchored_at(Utc::now())
    }

    pub fn anchored_at(wall: DateTime<Utc>) -> Self {
        Self { wall, started: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.started);
        match chrono::Duration::from_std(elapsed) {
            Ok(elapsed) => self.wall + elapsed,
            Err(_) => self.wall,
        }
    }
}
