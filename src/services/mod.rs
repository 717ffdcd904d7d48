// Business logic layer for the KeyGate backend

pub mod auth;
pub mod email;
pub mod expiration;
pub mod license;
pub mod session_store;
pub mod throttle;
pub mod token;

pub use auth::AuthService;
pub use email::EmailService;
pub use expiration::spawn_expiration_worker;
pub use license::{ActivationOutcome, LicenseService, ValidationVerdict};
pub use session_store::SessionStore;
pub use throttle::{ThrottleDecision, ThrottleService, ThrottleTier};
pub use token::{TokenPair, TokenService};
