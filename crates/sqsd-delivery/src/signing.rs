//! HMAC-SHA256 request signing.
//!
//! The signature is the lowercase hex HMAC-SHA256 of the exact request body
//! bytes, keyed by the configured secret, sent in a configurable header.

use hmac::{Hmac, Mac};
use reqwest::header::HeaderName;
use sha2::Sha256;

use crate::error::{DeliveryError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Signs outgoing request bodies.
#[derive(Clone)]
pub struct RequestSigner {
    header: HeaderName,
    mac: HmacSha256,
}

impl RequestSigner {
    /// Creates a signer for the given header name and secret key.
    ///
    /// Returns `Ok(None)` when either the header name or the key is empty,
    /// which disables signing.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the header name is not a
    /// valid HTTP header name.
    pub fn from_config(header: &str, key: &[u8]) -> Result<Option<Self>> {
        if header.is_empty() || key.is_empty() {
            return Ok(None);
        }

        let header = HeaderName::from_bytes(header.as_bytes()).map_err(|e| {
            DeliveryError::configuration(format!("invalid HMAC header name '{header}': {e}"))
        })?;

        let mac = HmacSha256::new_from_slice(key)
            .map_err(|e| DeliveryError::configuration(format!("invalid HMAC secret key: {e}")))?;

        Ok(Some(Self { header, mac }))
    }

    /// Returns the header the signature is sent in.
    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    /// Computes the signature of `body`.
    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner").field("header", &self.header).finish_non_exhaustive()
    }
}
