use serde::{Deserialize, Serialize};

/// Статус платежа, как его сообщает сервис.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

/// Ответ на запрос статуса платежа.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusResponse {
    pub status: PaymentStatus,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub error_reason: Option<String>,
}

impl PaymentStatusResponse {
    pub fn pending() -> Self {
        Self { status: PaymentStatus::Pending, transaction_id: None, error_reason: None }
    }

    pub fn success(transaction_id: Option<&str>) -> Self {
        Self {
            status: PaymentStatus::Success,
            transaction_id: transaction_id.map(str::to_string),
            error_reason: None,
        }
    }

    pub fn failed(reason: Option<&str>) -> Self {
        Self {
            status: PaymentStatus::Failed,
            transaction_id: None,
            error_reason: reason.map(str::to_string),
        }
    }

    /// Терминальный исход, если статус уже не PENDING.
    pub fn outcome(&self) -> Option<PaymentOutcome> {
        match self.status {
            PaymentStatus::Pending => None,
            PaymentStatus::Success => Some(PaymentOutcome::Success {
                transaction_id: self.transaction_id.clone(),
            }),
            PaymentStatus::Failed => Some(PaymentOutcome::Failed {
                reason: self.error_reason.clone(),
            }),
        }
    }
}

/// Исход наблюдения за платежом, который видит пользователь.
///
/// `Timeout` означает "неизвестно, обратитесь в поддержку", а не отказ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentOutcome {
    Pending,
    Success { transaction_id: Option<String> },
    Failed { reason: Option<String> },
    Timeout,
}

impl PaymentOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, PaymentOutcome::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }
}
