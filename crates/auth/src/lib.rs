//! Authentication primitives for the gateway: signed time-limited tokens,
//! signing-key lifecycle, and login credential verification.

pub mod credentials;
pub mod keys;
pub mod token;

pub use {
    credentials::{CredentialError, Credentials, ensure_password_hash, hash_password},
    keys::{decode_signing_key, ensure_signing_key, generate_signing_key},
    token::{Claims, TokenError, TokenService, unix_now},
};
