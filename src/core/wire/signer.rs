use crate::core::errors::KernelError;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use zeroize::Zeroizing;

/// Signer trait for message authentication
///
/// Implementations compute a keyed digest over the serialized parts of a
/// message (header, parent header, metadata, content, in that order).
/// Callers on different channels share one signer, so implementations must be
/// safe to call concurrently.
pub trait Signer: Send + Sync {
    /// Sign the parts and return the lowercase hex digest
    fn sign(&self, parts: &[&[u8]]) -> Result<String, KernelError>;

    /// Check a received hex signature against the parts
    ///
    /// # Returns
    /// - `Ok(true)` - signature matches (or signing is disabled)
    /// - `Ok(false)` - signature does not match
    fn verify(&self, signature: &str, parts: &[&[u8]]) -> Result<bool, KernelError>;

    /// Whether this signer produces non-empty signatures
    fn is_enabled(&self) -> bool;
}

/// Supported signature schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    HmacSha256,
    HmacSha512,
}

impl FromStr for SignatureScheme {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hmac-sha256" => Ok(Self::HmacSha256),
            "hmac-sha512" => Ok(Self::HmacSha512),
            other => Err(KernelError::SigningError(format!(
                "Unsupported signature scheme: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for SignatureScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HmacSha256 => f.write_str("hmac-sha256"),
            Self::HmacSha512 => f.write_str("hmac-sha512"),
        }
    }
}

enum KeyedMac {
    Sha256(Hmac<Sha256>),
    Sha512(Hmac<Sha512>),
}

/// HMAC signer keyed from the connection descriptor
///
/// The keyed MAC is stateful, so every sign/verify runs under one mutex.
pub struct HmacSigner {
    scheme: SignatureScheme,
    mac: Option<Mutex<KeyedMac>>,
}

impl HmacSigner {
    /// Create a new HMAC signer
    ///
    /// # Arguments
    /// * `key` - Shared secret from the connection descriptor; empty disables signing
    /// * `scheme` - Which digest to use
    pub fn new(key: &str, scheme: SignatureScheme) -> Result<Self, KernelError> {
        if key.is_empty() {
            return Ok(Self { scheme, mac: None });
        }

        let key_bytes = Zeroizing::new(key.as_bytes().to_vec());
        let mac = match scheme {
            SignatureScheme::HmacSha256 => KeyedMac::Sha256(
                Hmac::<Sha256>::new_from_slice(&key_bytes)
                    .map_err(|e| KernelError::SigningError(format!("Invalid key: {}", e)))?,
            ),
            SignatureScheme::HmacSha512 => KeyedMac::Sha512(
                Hmac::<Sha512>::new_from_slice(&key_bytes)
                    .map_err(|e| KernelError::SigningError(format!("Invalid key: {}", e)))?,
            ),
        };

        Ok(Self {
            scheme,
            mac: Some(Mutex::new(mac)),
        })
    }

    /// Create a signer from the descriptor's scheme name, e.g. `hmac-sha256`
    pub fn from_scheme_name(key: &str, scheme: &str) -> Result<Self, KernelError> {
        Self::new(key, scheme.parse()?)
    }

    pub const fn scheme(&self) -> SignatureScheme {
        self.scheme
    }
}

impl Signer for HmacSigner {
    fn sign(&self, parts: &[&[u8]]) -> Result<String, KernelError> {
        let Some(mac) = &self.mac else {
            return Ok(String::new());
        };

        let keyed = mac
            .lock()
            .map_err(|_| KernelError::SigningError("signer lock poisoned".to_string()))?;

        let digest = match &*keyed {
            KeyedMac::Sha256(m) => {
                let mut m = m.clone();
                for part in parts {
                    m.update(part);
                }
                m.finalize().into_bytes().to_vec()
            }
            KeyedMac::Sha512(m) => {
                let mut m = m.clone();
                for part in parts {
                    m.update(part);
                }
                m.finalize().into_bytes().to_vec()
            }
        };

        Ok(hex::encode(digest))
    }

    fn verify(&self, signature: &str, parts: &[&[u8]]) -> Result<bool, KernelError> {
        let Some(mac) = &self.mac else {
            return Ok(true);
        };

        // hex decoding accepts either case
        let Ok(expected) = hex::decode(signature) else {
            return Ok(false);
        };

        let keyed = mac
            .lock()
            .map_err(|_| KernelError::SigningError("signer lock poisoned".to_string()))?;

        let matches = match &*keyed {
            KeyedMac::Sha256(m) => {
                let mut m = m.clone();
                for part in parts {
                    m.update(part);
                }
                m.verify_slice(&expected).is_ok()
            }
            KeyedMac::Sha512(m) => {
                let mut m = m.clone();
                for part in parts {
                    m.update(part);
                }
                m.verify_slice(&expected).is_ok()
            }
        };

        Ok(matches)
    }

    fn is_enabled(&self) -> bool {
        self.mac.is_some()
    }
}
