//! Replacement value generation
//!
//! All kinds draw from the operating system CSPRNG. Alphanumeric values use
//! rejection sampling so every character is equally likely.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;

use super::SecretKind;
use crate::config::defaults::{
    API_KEY_LENGTH, BOT_CREDENTIAL_LENGTH, ENCRYPTION_KEY_BYTES, SIGNING_SECRET_LENGTH,
};

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Largest multiple of 62 that fits in a byte
const ACCEPT_BELOW: u8 = 248;

pub fn generate(kind: SecretKind) -> Result<String, rand::Error> {
    match kind {
        SecretKind::BotCredential => random_alphanumeric(BOT_CREDENTIAL_LENGTH),
        SecretKind::ApiKey => random_alphanumeric(API_KEY_LENGTH),
        SecretKind::SigningSecret => random_alphanumeric(SIGNING_SECRET_LENGTH),
        SecretKind::EncryptionKey => random_key(ENCRYPTION_KEY_BYTES),
    }
}

pub fn random_alphanumeric(len: usize) -> Result<String, rand::Error> {
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 64];
    while out.len() < len {
        OsRng.try_fill_bytes(&mut buf)?;
        for &b in buf.iter().filter(|&&b| b < ACCEPT_BELOW) {
            if out.len() == len {
                break;
            }
            out.push(char::from(ALPHANUMERIC[usize::from(b) % ALPHANUMERIC.len()]));
        }
    }
    Ok(out)
}

/// `bytes` random bytes, base64 encoded
pub fn random_key(bytes: usize) -> Result<String, rand::Error> {
    let mut key = vec![0u8; bytes];
    OsRng.try_fill_bytes(&mut key)?;
    Ok(STANDARD.encode(key))
}
