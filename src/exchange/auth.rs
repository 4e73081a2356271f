//! Gate.io API v4 Authentication
//!
//! HMAC-SHA512 request signing. The signed payload is
//! `METHOD\nPATH\nQUERY\nhex(sha512(body))\nTIMESTAMP`.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha512};

type HmacSha512 = Hmac<Sha512>;

/// Signed header values for one request
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub key: String,
    pub timestamp: String,
    pub sign: String,
}

/// Gate.io authentication handler
#[derive(Clone)]
pub struct GateAuth {
    api_key: String,
    api_secret: String,
}

impl GateAuth {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self { api_key, api_secret }
    }

    /// Sign a request with the current unix time
    pub fn sign(&self, method: &str, path: &str, query: &str, body: &str) -> SignedHeaders {
        self.sign_at(method, path, query, body, Self::timestamp_secs())
    }

    /// Sign a request at a fixed timestamp (seconds)
    pub fn sign_at(&self, method: &str, path: &str, query: &str, body: &str, timestamp: u64) -> SignedHeaders {
        let body_hash = hex::encode(Sha512::digest(body.as_bytes()));
        let payload = format!(
            "{}\n{}\n{}\n{}\n{}",
            method.to_uppercase(),
            path,
            query,
            body_hash,
            timestamp
        );

        // HMAC accepts keys of any length
        let mut mac = HmacSha512::new_from_slice(self.api_secret.as_bytes())
            .unwrap_or_else(|_| panic!("HMAC initialization failed - invalid key"));
        mac.update(payload.as_bytes());

        SignedHeaders {
            key: self.api_key.clone(),
            timestamp: timestamp.to_string(),
            sign: hex::encode(mac.finalize().into_bytes()),
        }
    }

    fn timestamp_secs() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

impl std::fmt::Debug for GateAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateAuth")
            .field("api_key", &format!("{}...", &self.api_key[..8.min(self.api_key.len())]))
            .finish()
    }
}
