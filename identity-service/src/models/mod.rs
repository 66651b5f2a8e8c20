pub mod otp_code;
pub mod password_reset_token;
pub mod refresh_token;
pub mod user;

pub use otp_code::{OtpChallenge, OtpPurpose};
pub use password_reset_token::PasswordResetToken;
pub use refresh_token::RefreshTokenRecord;
pub use user::{normalize_email, Role, User, UserResponse};
