//! Последнее известное состояние мест одного сеанса.
//!
//! Пишет в хранилище единственный логический владелец (мост канал/опрос),
//! читают многие. О каждом изменении сообщается через ревизию в `watch`.

pub mod conflicts;

use std::sync::RwLock;

use indexmap::IndexMap;
use tokio::sync::watch;
use tracing::debug;

use crate::models::{Seat, SeatEvent, SeatStatus};
use crate::{read, write};

pub use conflicts::{ConflictTracker, Selection};

#[derive(Debug)]
pub struct SeatStateStore {
    showtime_id: String,
    // Порядок вставки сохраняется: снимок отдаётся в порядке ответа сервиса
    seats: RwLock<IndexMap<String, Seat>>,
    revision: watch::Sender<u64>,
}

impl SeatStateStore {
    pub fn new(showtime_id: impl Into<String>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            showtime_id: showtime_id.into(),
            seats: RwLock::new(IndexMap::new()),
            revision,
        }
    }

    pub fn showtime_id(&self) -> &str {
        &self.showtime_id
    }

    /// Полностью заменяет коллекцию (первая загрузка и полный перезапрос).
    pub fn initialize(&self, seats: Vec<Seat>) {
        let collection: IndexMap<String, Seat> =
            seats.into_iter().map(|seat| (seat.id.clone(), seat)).collect();
        let count = collection.len();
        *write(&self.seats) = collection;
        self.bump();
        debug!(showtime_id = %self.showtime_id, seats = count, "seat collection replaced");
    }

    /// Применяет событие: каждое известное место получает статус по виду события,
    /// неизвестные id игнорируются. Возвращает число мест, чей статус изменился.
    pub fn apply_event(&self, event: &SeatEvent) -> usize {
        let status = event.kind.resulting_status();
        let mut changed = 0;
        {
            let mut seats = write(&self.seats);
            for id in &event.seat_ids {
                if let Some(seat) = seats.get_mut(id) {
                    if seat.status != status {
                        seat.status = status;
                        changed += 1;
                    }
                }
            }
        }

        if changed > 0 {
            self.bump();
        }
        changed
    }

    /// Снимок коллекции на текущий момент.
    pub fn snapshot(&self) -> Vec<Seat> {
        read(&self.seats).values().cloned().collect()
    }

    pub fn get(&self, seat_id: &str) -> Option<Seat> {
        read(&self.seats).get(seat_id).cloned()
    }

    pub fn status_of(&self, seat_id: &str) -> Option<SeatStatus> {
        read(&self.seats).get(seat_id).map(|seat| seat.status)
    }

    pub fn len(&self) -> usize {
        read(&self.seats).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn available_count(&self) -> usize {
        read(&self.seats).values().filter(|seat| seat.status.is_available()).count()
    }

    /// Номер ревизии растёт при каждом изменении коллекции.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}
