//! `X-Twilio-Signature` validation
//!
//! The signature is base64(HMAC-SHA1(auth_token, url + sorted key/value
//! pairs of the POST body)).

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

fn signing_mac(auth_token: &str, url: &str, params: &[(String, String)]) -> Option<HmacSha1> {
    let mut mac = HmacSha1::new_from_slice(auth_token.as_bytes()).ok()?;

    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();

    mac.update(url.as_bytes());
    for (key, value) in sorted {
        mac.update(key.as_bytes());
        mac.update(value.as_bytes());
    }
    Some(mac)
}

/// Signature Twilio would send for this request
pub fn compute_signature(auth_token: &str, url: &str, params: &[(String, String)]) -> String {
    match signing_mac(auth_token, url, params) {
        Some(mac) => BASE64.encode(mac.finalize().into_bytes()),
        None => String::new(),
    }
}

/// Constant-time check of a received signature
pub fn verify_signature(
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
    signature: &str,
) -> bool {
    let Ok(received) = BASE64.decode(signature.trim()) else {
        return false;
    };
    match signing_mac(auth_token, url, params) {
        Some(mac) => mac.verify_slice(&received).is_ok(),
        None => false,
    }
}
