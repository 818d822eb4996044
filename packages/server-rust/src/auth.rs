//! HMAC credentials for client connections and private channels.
//!
//! A client token is the hex HMAC-SHA-256 digest of `(user, timestamp,
//! info)` under the shared secret; a channel sign covers `(client,
//! channel, info)`. Comparison is constant-time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

fn sign(secret: &str, parts: &[&str]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    for part in parts {
        mac.update(part.as_bytes());
    }
    hex::encode(mac.finalize().into_bytes())
}

fn verify(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

/// Generates the connect/refresh token for `(user, timestamp, info)`.
#[must_use]
pub fn generate_client_token(secret: &str, user: &str, timestamp: &str, info: &str) -> String {
    sign(secret, &[user, timestamp, info])
}

/// Checks a connect/refresh token in constant time.
#[must_use]
pub fn check_client_token(
    secret: &str,
    user: &str,
    timestamp: &str,
    info: &str,
    token: &str,
) -> bool {
    verify(&generate_client_token(secret, user, timestamp, info), token)
}

/// Generates the private-channel sign for `(client, channel, info)`.
#[must_use]
pub fn generate_channel_sign(secret: &str, client: &str, channel: &str, info: &str) -> String {
    sign(secret, &[client, channel, info])
}

/// Checks a private-channel sign in constant time.
#[must_use]
pub fn check_channel_sign(
    secret: &str,
    client: &str,
    channel: &str,
    info: &str,
    sign: &str,
) -> bool {
    verify(&generate_channel_sign(secret, client, channel, info), sign)
}
