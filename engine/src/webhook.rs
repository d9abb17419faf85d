// Webhook secret provisioning and signature validation.

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Generate a secret key for webhook signature validation.
///
/// The key is 32 cryptographically random bytes, hex-encoded, shared with
/// the webhook caller out of band.
pub fn generate_webhook_secret() -> String {
    let mut rng = rand::thread_rng();
    let random_bytes: [u8; 32] = rng.gen();
    hex::encode(random_bytes)
}

/// Sign a payload with a webhook secret, producing the hex-encoded
/// HMAC-SHA256 signature a caller must send alongside the body.
pub fn sign_payload(payload: &[u8], secret: &str) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        // HMAC accepts keys of any length; unreachable in practice.
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Validate the HMAC-SHA256 signature of a webhook request body.
///
/// The comparison runs in constant time via the Mac verifier.
pub fn validate_webhook_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    let decoded = match hex::decode(signature) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    mac.verify_slice(&decoded).is_ok()
}
