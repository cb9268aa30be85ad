pub mod api_client;
pub mod channel;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod session;
pub mod store;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use api_client::{ApiClient, PaymentStatusSource, SeatQuery};
pub use channel::{ConnectionState, EventChannel, Transport, WsTransport};
pub use config::Config;
pub use error::{DecodeError, FetchError, TransportError};
pub use models::{PaymentOutcome, Seat, SeatEvent, SeatEventKind, SeatStatus};
pub use session::{SessionDeps, ShowtimeSession};

// Обработчики не паникуют под блокировкой, но если это случилось - данные всё равно целы:
// каждая запись заменяет значение целиком.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
