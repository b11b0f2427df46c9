//! Mobile-money push payments: initiation, adaptive polling and
//! exactly-once reconciliation with the loan ledger

pub mod callback;
pub mod daraja;
pub mod gateway;
pub mod phone;
mod poller;
pub mod schedule;
pub mod service;
pub mod session;
pub mod throttle;

pub use callback::{CallbackResult, StkCallbackEnvelope};
pub use daraja::DarajaClient;
pub use gateway::{GatewayError, PaymentGateway, PushAccepted, PushRequest, QueryStatus, SandboxGateway};
pub use phone::normalize_phone;
pub use service::{InitiatePushRequest, PaymentError, PaymentService, PaymentSettings};
pub use session::{NextStep, PaymentSession, SessionState};
pub use throttle::PushThrottle;
