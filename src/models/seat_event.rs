use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use super::SeatStatus;

/// Вид перехода, о котором сообщает сервер.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatEventKind {
    Held,
    Released,
    Booked,
    HoldExpired,
}

impl SeatEventKind {
    /// Статус, который получает каждое место из события.
    /// Не зависит от текущего статуса, поэтому применение идемпотентно.
    pub fn resulting_status(self) -> SeatStatus {
        match self {
            SeatEventKind::Held => SeatStatus::Held,
            SeatEventKind::Released | SeatEventKind::HoldExpired => SeatStatus::Available,
            SeatEventKind::Booked => SeatStatus::Booked,
        }
    }

    /// Делает ли событие места недоступными для других покупателей.
    pub fn takes_seats(self) -> bool {
        matches!(self, SeatEventKind::Held | SeatEventKind::Booked)
    }
}

/// Уведомление о переходе набора мест одного сеанса.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatEvent {
    #[serde(rename = "type")]
    pub kind: SeatEventKind,
    pub seat_ids: Vec<String>,
    pub showtime_id: String,
}

impl SeatEvent {
    pub fn new<I, S>(kind: SeatEventKind, showtime_id: impl Into<String>, seat_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SeatEvent {
            kind,
            seat_ids: seat_ids.into_iter().map(Into::into).collect(),
            showtime_id: showtime_id.into(),
        }
    }

    /// Разбирает текстовый фрейм транспорта.
    pub fn decode(frame: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Разбирает фрейм и проверяет, что он относится к ожидаемому сеансу.
    pub fn decode_for(frame: &str, showtime_id: &str) -> Result<Self, DecodeError> {
        let event = Self::decode(frame)?;
        if event.showtime_id != showtime_id {
            return Err(DecodeError::ForeignShowtime {
                expected: showtime_id.to_string(),
                actual: event.showtime_id,
            });
        }
        Ok(event)
    }
}
