pub mod booking_confirmation;
pub mod checkout_provider;
pub mod deposit_dispatcher;
pub mod payment_event_handler;
pub mod payment_intent_store;
pub mod preloader;
pub mod processed_key_store;

pub use booking_confirmation::{BookingConfirmation, CreateAppointmentRequest, LoggingBookingConfirmation, MoxieAppointmentResult, MoxieBookingClient, MOXIE_APPOINTMENT_DURATION, NO_PREFERENCE_PROVIDER};
pub use checkout_provider::{CheckoutProvider, PlaceholderCheckoutProvider};
pub use deposit_dispatcher::{DepositDispatchOutcome, DepositDispatcher};
pub use payment_event_handler::PaymentEventHandler;
pub use payment_intent_store::{InMemoryPaymentIntentStore, PaymentIntentStore, RedisPaymentIntentStore, UnsupportedDuplicateGuardStore};
pub use preloader::DepositPreloader;
pub use processed_key_store::{InMemoryProcessedKeyStore, ProcessedKeyStore, RedisProcessedKeyStore};
