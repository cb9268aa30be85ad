use serde::{Deserialize, Serialize};
use std::fmt;

/// Статус доступности места.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Available,
    Held,
    Booked,
    Blocked,
}

impl SeatStatus {
    pub fn is_available(self) -> bool {
        self == SeatStatus::Available
    }
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SeatStatus::Available => "AVAILABLE",
            SeatStatus::Held => "HELD",
            SeatStatus::Booked => "BOOKED",
            SeatStatus::Blocked => "BLOCKED",
        };
        f.write_str(s)
    }
}

// Порядок вариантов важен: категория порядковая (derive Ord)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatCategory {
    Standard,
    Premium,
    Couple,
    Accessible,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seat {
    pub id: String,
    pub row: String,
    pub number: u32,
    pub category: SeatCategory,
    pub status: SeatStatus,
    #[serde(default)]
    pub price: Option<f64>,
}

impl Seat {
    /// Свободное место стандартной категории без цены, удобно для тестов и демо.
    pub fn available(id: impl Into<String>, row: impl Into<String>, number: u32) -> Self {
        Seat {
            id: id.into(),
            row: row.into(),
            number,
            category: SeatCategory::Standard,
            status: SeatStatus::Available,
            price: None,
        }
    }
}
