//! Обратный отсчёт удержания мест.
//!
//! RUNNING -> EXPIRED (терминальное). Оставшиеся целые секунды пересчитываются
//! раз в секунду от абсолютного дедлайна; колбэк истечения вызывается ровно один раз
//! на тике, где остаток стал нулём.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::HoldError;
use crate::lock;

pub const DEFAULT_WARNING_SECONDS: u64 = 60;

type ExpireCallback = Box<dyn FnOnce() + Send>;

/// То, что показывает интерфейс.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownView {
    pub remaining_secs: u64,
    /// Осталось меньше порога, только сигнал для отображения.
    pub warning: bool,
    pub expired: bool,
}

/// `max(0, floor((expires_at - now) / 1000))`.
pub fn remaining_secs(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (expires_at - now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        (millis / 1000) as u64
    }
}

struct CountdownShared {
    clock: Arc<dyn Clock>,
    warning_secs: u64,
    view: watch::Sender<CountdownView>,
    on_expire: Mutex<Option<ExpireCallback>>,
    expires_at: Mutex<DateTime<Utc>>,
}

impl CountdownShared {
    fn publish(&self, remaining: u64) {
        let expired = remaining == 0;
        self.view.send_replace(CountdownView {
            remaining_secs: remaining,
            warning: remaining < self.warning_secs,
            expired,
        });
    }

    fn fire(&self) {
        // take() гарантирует единственный вызов при любом числе перезапусков
        let callback = lock(&self.on_expire).take();
        if let Some(callback) = callback {
            info!("⏰ seat hold expired");
            callback();
        }
    }

    async fn tick(self: Arc<Self>, expires_at: DateTime<Utc>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let remaining = remaining_secs(expires_at, self.clock.now());
            self.publish(remaining);
            if remaining == 0 {
                self.fire();
                return;
            }
        }
    }
}

pub struct HoldCountdown {
    shared: Arc<CountdownShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HoldCountdown {
    /// Запускает отсчёт. Первый пересчёт выполняется сразу.
    pub fn start<F>(clock: Arc<dyn Clock>, expires_at: DateTime<Utc>, on_expire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::with_warning(clock, expires_at, DEFAULT_WARNING_SECONDS, on_expire)
    }

    pub fn with_warning<F>(
        clock: Arc<dyn Clock>,
        expires_at: DateTime<Utc>,
        warning_secs: u64,
        on_expire: F,
    ) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let remaining = remaining_secs(expires_at, clock.now());
        let (view, _) = watch::channel(CountdownView {
            remaining_secs: remaining,
            warning: remaining < warning_secs,
            expired: false,
        });
        let shared = Arc::new(CountdownShared {
            clock,
            warning_secs,
            view,
            on_expire: Mutex::new(Some(Box::new(on_expire))),
            expires_at: Mutex::new(expires_at),
        });
        let task = tokio::spawn(shared.clone().tick(expires_at));
        debug!(%expires_at, remaining, "hold countdown started");

        Self { shared, task: Mutex::new(Some(task)) }
    }

    /// Новый дедлайн (например, удержание продлено). Отложенный тик отменяется,
    /// остаток считается заново. После истечения перезапуск невозможен.
    pub fn restart(&self, expires_at: DateTime<Utc>) -> Result<(), HoldError> {
        let mut task = lock(&self.task);
        if self.is_expired() {
            return Err(HoldError::Expired);
        }
        if let Some(previous) = task.take() {
            previous.abort();
        }

        *lock(&self.shared.expires_at) = expires_at;
        *task = Some(tokio::spawn(self.shared.clone().tick(expires_at)));
        debug!(%expires_at, "hold countdown restarted");
        Ok(())
    }

    /// Останавливает отсчёт без вызова колбэка (бронь завершена или отменена).
    pub fn cancel(&self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
    }

    pub fn view(&self) -> CountdownView {
        *self.shared.view.borrow()
    }

    pub fn remaining_secs(&self) -> u64 {
        self.view().remaining_secs
    }

    pub fn is_warning(&self) -> bool {
        self.view().warning
    }

    pub fn is_expired(&self) -> bool {
        self.view().expired
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        *lock(&self.shared.expires_at)
    }

    pub fn watch(&self) -> watch::Receiver<CountdownView> {
        self.shared.view.subscribe()
    }
}

impl Drop for HoldCountdown {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = fired.clone();
        (fired, move || {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_remaining_secs_floors_and_clamps() {
        let now = Utc::now();
        assert_eq!(remaining_secs(now + chrono::Duration::milliseconds(5_999), now), 5);
        assert_eq!(remaining_secs(now + chrono::Duration::milliseconds(999), now), 0);
        assert_eq!(remaining_secs(now - chrono::Duration::seconds(30), now), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_on_fifth_tick() {
        let clock = Arc::new(MonotonicClock::new());
        let (fired, on_expire) = counter();
        let countdown = HoldCountdown::start(clock.clone(), clock.now() + chrono::Duration::seconds(5), on_expire);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(countdown.remaining_secs(), 5);
        assert!(countdown.is_warning());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(countdown.remaining_secs(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(countdown.is_expired());
        assert_eq!(countdown.remaining_secs(), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_warning_threshold() {
        let clock = Arc::new(MonotonicClock::new());
        let (_fired, on_expire) = counter();
        let countdown = HoldCountdown::start(clock.clone(), clock.now() + chrono::Duration::seconds(90), on_expire);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!countdown.is_warning());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(countdown.remaining_secs(), 60);
        assert!(!countdown.is_warning());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(countdown.remaining_secs(), 59);
        assert!(countdown.is_warning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_extends_without_double_fire() {
        let clock = Arc::new(MonotonicClock::new());
        let (fired, on_expire) = counter();
        let countdown = HoldCountdown::start(clock.clone(), clock.now() + chrono::Duration::seconds(3), on_expire);

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        countdown.restart(clock.now() + chrono::Duration::seconds(10)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(countdown.remaining_secs(), 10);

        // старый дедлайн прошёл, колбэк не сработал
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(countdown.restart(clock.now() + chrono::Duration::seconds(60)), Err(HoldError::Expired));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_deadline_expires_on_first_tick() {
        let clock = Arc::new(MonotonicClock::new());
        let (fired, on_expire) = counter();
        let countdown = HoldCountdown::start(clock.clone(), clock.now() - chrono::Duration::seconds(5), on_expire);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(countdown.is_expired());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_never_fires() {
        let clock = Arc::new(MonotonicClock::new());
        let (fired, on_expire) = counter();
        let countdown = HoldCountdown::start(clock.clone(), clock.now() + chrono::Duration::seconds(2), on_expire);
        countdown.cancel();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!countdown.is_expired());
    }
}
