use std::collections::BTreeSet;
use std::sync::RwLock;

use tokio::sync::watch;
use tracing::info;

use crate::models::SeatEvent;
use crate::{read, write};

/// Места, которые пользователь предварительно выбрал. Меняется только его действиями.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    ids: BTreeSet<String>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Возвращает `false`, если место уже было выбрано.
    pub fn select(&mut self, seat_id: impl Into<String>) -> bool {
        self.ids.insert(seat_id.into())
    }

    pub fn deselect(&mut self, seat_id: &str) -> bool {
        self.ids.remove(seat_id)
    }

    /// Переключает выбор, возвращает новое состояние места.
    pub fn toggle(&mut self, seat_id: &str) -> bool {
        if self.ids.remove(seat_id) {
            false
        } else {
            self.ids.insert(seat_id.to_string());
            true
        }
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn contains(&self, seat_id: &str) -> bool {
        self.ids.contains(seat_id)
    }

    pub fn ids(&self) -> &BTreeSet<String> {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Selection {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self { ids: iter.into_iter().map(Into::into).collect() }
    }
}

/// Отмечает выбранные места, которые занял кто-то другой.
///
/// Набор конфликтов только растёт при отслеживании и очищается только явно.
#[derive(Debug)]
pub struct ConflictTracker {
    conflicts: RwLock<BTreeSet<String>>,
    version: watch::Sender<u64>,
}

impl Default for ConflictTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConflictTracker {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self { conflicts: RwLock::new(BTreeSet::new()), version }
    }

    /// Пересекает места из HELD/BOOKED события с выбором и добавляет пересечение
    /// в набор конфликтов. Возвращает места, которые стали конфликтными впервые.
    pub fn track(&self, event: &SeatEvent, selection: &Selection) -> Vec<String> {
        if !event.kind.takes_seats() {
            return Vec::new();
        }

        let added: Vec<String> = {
            let mut conflicts = write(&self.conflicts);
            event
                .seat_ids
                .iter()
                .filter(|id| selection.contains(id))
                .filter(|id| conflicts.insert((*id).clone()))
                .cloned()
                .collect()
        };

        if !added.is_empty() {
            info!(seats = ?added, kind = ?event.kind, "selected seats taken by another customer");
            self.version.send_modify(|v| *v += 1);
        }
        added
    }

    pub fn conflicts(&self) -> BTreeSet<String> {
        read(&self.conflicts).clone()
    }

    pub fn has_conflicts(&self) -> bool {
        !read(&self.conflicts).is_empty()
    }

    pub fn is_conflicted(&self, seat_id: &str) -> bool {
        read(&self.conflicts).contains(seat_id)
    }

    /// Пользователь увидел предупреждение: очищаем набор.
    pub fn clear_conflicts(&self) {
        let had_any = {
            let mut conflicts = write(&self.conflicts);
            let had_any = !conflicts.is_empty();
            conflicts.clear();
            had_any
        };
        if had_any {
            self.version.send_modify(|v| *v += 1);
        }
    }

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}
