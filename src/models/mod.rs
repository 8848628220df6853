pub mod adventure;
pub mod booking;
pub mod mpesa;
pub mod page;
pub mod payment;
pub mod user;

pub use adventure::{Adventure, AdventurePatch, NewAdventure};
pub use booking::{Booking, BookingStatus, ContactInfo};
pub use mpesa::{CallbackMetadata, StkCallback, StkCallbackEnvelope};
pub use page::{Page, PageParams};
pub use payment::{Payment, PaymentEvent, PaymentStatus};
pub use user::{AuthContext, User, UserDetail, UserStatistics};
