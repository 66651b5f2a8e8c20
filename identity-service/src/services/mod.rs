pub mod auth;
pub mod email;
pub mod error;
pub mod jwt;
pub mod metrics;

pub use auth::AuthService;
pub use email::{LogNotifier, MockNotifier, Notifier, SmtpNotifier};
pub use error::{AccessDenied, AuthFailure, ServiceError};
pub use jwt::{Claims, JwtService, SignedToken, TokenRejection};
