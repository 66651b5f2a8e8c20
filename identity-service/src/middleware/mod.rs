pub mod auth;
pub mod metrics;

pub use auth::{auth_middleware, require_role, AuthUser};
pub use metrics::metrics_middleware;
