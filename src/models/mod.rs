pub mod seat;
pub mod seat_event;
pub mod payment;

pub use seat::{Seat, SeatCategory, SeatStatus};
pub use seat_event::{SeatEvent, SeatEventKind};
pub use payment::{PaymentOutcome, PaymentStatus, PaymentStatusResponse};
