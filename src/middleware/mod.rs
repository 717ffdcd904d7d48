// Middleware for the KeyGate backend: authentication + session liveness,
// three-tier throttling, security headers, CORS

pub mod auth;
pub mod auth_middleware;
pub mod cors;
pub mod security_headers;
pub mod throttle_middleware;

pub use auth::AuthenticatedUser;
pub use auth_middleware::{admin_middleware, auth_middleware};
pub use cors::cors_middleware;
pub use security_headers::security_headers_middleware;
pub use throttle_middleware::{edge_throttle_middleware, user_throttle_middleware};
