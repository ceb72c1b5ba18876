pub mod auth;
pub mod rate_limit;

pub use auth::{identity_middleware, CustomerClaims, JwtIdentity};
pub use rate_limit::enforce_hold_rate;
