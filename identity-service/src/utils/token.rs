//! Random secrets handed to users and the digests stored in their place.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, Rng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Hex SHA-256 of a raw token, reset token or OTP code.
pub fn hash_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Six decimal digits, uniform over 100000..=999999.
pub fn generate_otp() -> String {
    OsRng.gen_range(100_000..=999_999u32).to_string()
}

/// 32 random bytes, base64url without padding.
pub fn generate_reset_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compare a submitted code against a stored digest without early exit.
pub fn otp_matches(submitted: &str, stored_hash: &str) -> bool {
    let candidate = hash_token(submitted);
    candidate.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}
