pub mod countdown;
pub mod payment;
pub mod polling;

pub use countdown::{CountdownView, HoldCountdown};
pub use payment::{PaymentHandlers, PaymentWatchSettings, PaymentWatcher};
pub use polling::{refresh_seats, FallbackMode, PollingFallback};
