//! HTTP handlers for identity-service.

pub mod auth;
pub mod metrics;
pub mod user;
pub mod well_known;

pub use auth::*;
pub use user::{get_me, get_user};
