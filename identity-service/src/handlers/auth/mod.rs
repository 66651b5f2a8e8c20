pub mod password;
pub mod registration;
pub mod session;

pub use password::{
    confirm_password_reset, forgot_password, request_password_reset, reset_password,
};
pub use registration::{register, resend_verification, verify_email};
pub use session::{login, logout, refresh};
