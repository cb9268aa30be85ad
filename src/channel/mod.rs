//! Канал событий о местах одного сеанса.
//!
//! Держит одно логическое соединение с транспортом, переподключается с
//! экспоненциальной задержкой и раздаёт разобранные события подписчикам.
//! Неразбираемые фреймы отбрасываются: это канал сигналов, а не транзакционный протокол.

pub mod backoff;
pub mod transport;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::lock;
use crate::models::SeatEvent;

pub use backoff::{Backoff, ReconnectPolicy};
pub use transport::{FrameStream, Transport, WsTransport};

/// Состояние соединения канала.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

/// Обработчик события. Может отписаться или закрыть канал прямо из вызова.
pub type EventHandler = Arc<dyn Fn(&SeatEvent) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: AtomicU64,
    // BTreeMap: подписчики вызываются в порядке регистрации
    handlers: Mutex<BTreeMap<u64, EventHandler>>,
}

impl Subscribers {
    fn insert(&self, handler: EventHandler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.handlers).insert(id, handler);
        id
    }

    fn remove(&self, id: u64) -> bool {
        lock(&self.handlers).remove(&id).is_some()
    }

    fn clear(&self) {
        lock(&self.handlers).clear();
    }

    fn len(&self) -> usize {
        lock(&self.handlers).len()
    }

    fn dispatch(&self, event: &SeatEvent) {
        let handlers: Vec<(u64, EventHandler)> = lock(&self.handlers)
            .iter()
            .map(|(id, handler)| (*id, handler.clone()))
            .collect();

        for (id, handler) in handlers {
            // Снятый предыдущим обработчиком подписчик уже не вызывается
            if !lock(&self.handlers).contains_key(&id) {
                continue;
            }
            handler(event);
        }
    }
}

/// Возможность отписаться. Если канал уже уничтожен, отписка ничего не делает.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    subscribers: Weak<Subscribers>,
}

impl Subscription {
    /// Возвращает `true`, если обработчик был зарегистрирован.
    pub fn unsubscribe(self) -> bool {
        match self.subscribers.upgrade() {
            Some(subscribers) => subscribers.remove(self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers").field("len", &self.len()).finish()
    }
}

pub struct EventChannel {
    showtime_id: String,
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    state: Arc<watch::Sender<ConnectionState>>,
    subscribers: Arc<Subscribers>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventChannel {
    pub fn new(
        showtime_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        Self {
            showtime_id: showtime_id.into(),
            transport,
            policy,
            state: Arc::new(state),
            subscribers: Arc::new(Subscribers::default()),
            task: Mutex::new(None),
        }
    }

    pub fn showtime_id(&self) -> &str {
        &self.showtime_id
    }

    /// Начинает устанавливать соединение и сразу возвращает управление.
    /// Повторный вызов при живом цикле соединения ничего не делает.
    pub fn connect(&self) {
        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        self.state.send_replace(ConnectionState::Connecting);
        let cycle = ConnectionLoop {
            showtime_id: self.showtime_id.clone(),
            transport: self.transport.clone(),
            policy: self.policy,
            state: self.state.clone(),
            subscribers: self.subscribers.clone(),
        };
        *task = Some(tokio::spawn(cycle.run()));
    }

    /// Регистрирует обработчик событий.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SeatEvent) + Send + Sync + 'static,
    {
        let id = self.subscribers.insert(Arc::new(handler));
        Subscription { id, subscribers: Arc::downgrade(&self.subscribers) }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Рвёт соединение, отменяет отложенное переподключение и снимает всех подписчиков.
    /// Безопасно вызывать многократно и из любого состояния.
    pub fn disconnect(&self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
            info!(showtime_id = %self.showtime_id, "seat event channel disconnected");
        }
        self.subscribers.clear();
        self.state.send_if_modified(|state| {
            let changed = *state != ConnectionState::Closed;
            *state = ConnectionState::Closed;
            changed
        });
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Приёмник изменений состояния соединения.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Фоновый цикл соединения: подключиться, читать, при обрыве ждать и повторять.
struct ConnectionLoop {
    showtime_id: String,
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    state: Arc<watch::Sender<ConnectionState>>,
    subscribers: Arc<Subscribers>,
}

impl ConnectionLoop {
    async fn run(self) {
        let mut backoff = Backoff::new(self.policy);

        loop {
            match self.transport.connect(&self.showtime_id).await {
                Ok(frames) => {
                    backoff.reset();
                    self.state.send_replace(ConnectionState::Open);
                    info!(showtime_id = %self.showtime_id, "🔌 seat event channel open");

                    let Some(reason) = self.pump(frames).await else {
                        return;
                    };
                    warn!(showtime_id = %self.showtime_id, error = %reason, "seat event channel dropped");
                }
                Err(e) => {
                    warn!(
                        showtime_id = %self.showtime_id,
                        attempt = backoff.attempt(),
                        error = %e,
                        "seat event channel connect failed"
                    );
                }
            }

            let Some(delay) = backoff.next_delay() else {
                self.state.send_replace(ConnectionState::Closed);
                warn!(
                    showtime_id = %self.showtime_id,
                    attempts = self.policy.max_attempts,
                    "giving up on seat event channel, relying on polling"
                );
                return;
            };

            self.state.send_replace(ConnectionState::Reconnecting);
            debug!(
                showtime_id = %self.showtime_id,
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "scheduling reconnect"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Читает фреймы до обрыва. События раздаются в порядке получения.
    /// `None`, если обработчик закрыл канал через `disconnect()`.
    async fn pump(&self, mut frames: FrameStream) -> Option<TransportError> {
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(text) => match SeatEvent::decode_for(&text, &self.showtime_id) {
                    Ok(event) => {
                        self.subscribers.dispatch(&event);
                        if *self.state.borrow() == ConnectionState::Closed {
                            return None;
                        }
                    }
                    Err(e) => debug!(showtime_id = %self.showtime_id, error = %e, "dropping seat event frame"),
                },
                Err(e) => return Some(e),
            }
        }
        Some(TransportError::Closed)
    }
}
