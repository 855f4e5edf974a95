//! Sealed storage for credential material.
//!
//! Secrets are encrypted with AES-256-GCM before they touch the database and
//! decrypted only into short-lived stack values while a probe builds its
//! request. External reads always go through [`mask`].

use base64::{engine::general_purpose, Engine as _};
use httpmon_common::types::CredentialKind;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::hkdf;
use ring::rand::{SecureRandom, SystemRandom};

/// HKDF context label binding derived keys to this use.
const KDF_CONTEXT: &[u8] = b"httpmon credential sealing v1";

/// Minimum length accepted for the configured secret.
const MIN_SECRET_LEN: usize = 16;

/// Errors raised by the secret store.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The configured secret is too short to derive a key from.
    #[error("Crypto: encryption secret too short ({len} bytes, need at least {MIN_SECRET_LEN})")]
    WeakSecret { len: usize },

    /// Key derivation failed, which should be unreachable for valid inputs.
    #[error("Crypto: key derivation failed")]
    KeyDerivation,

    /// AEAD sealing failed.
    #[error("Crypto: encryption failed")]
    Encrypt,

    /// Authentication failed: tampered, truncated, or sealed under another key.
    #[error("Crypto: decryption failed")]
    Decrypt,

    /// The ciphertext is not valid base64 or is shorter than IV + tag.
    #[error("Crypto: malformed ciphertext")]
    InvalidCiphertext,
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// AES-256-GCM seal/open over a key derived from the operator's secret.
pub struct SecretStore {
    key_bytes: [u8; 32],
}

impl SecretStore {
    /// Derives the AES-256 key from `secret` via HKDF-SHA256 with a context
    /// label. Secrets shorter than 16 bytes are rejected.
    pub fn new(secret: &str) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(CryptoError::WeakSecret { len: secret.len() });
        }

        let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, b"");
        let prk = salt.extract(secret.as_bytes());
        let okm = prk
            .expand(&[KDF_CONTEXT], hkdf::HKDF_SHA256)
            .map_err(|_| CryptoError::KeyDerivation)?;

        let mut key_bytes = [0u8; 32];
        okm.fill(&mut key_bytes)
            .map_err(|_| CryptoError::KeyDerivation)?;

        Ok(Self { key_bytes })
    }

    /// Encrypts `plaintext`, returning base64 of `IV || ciphertext || tag`
    /// with a fresh 96-bit IV per call.
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let unbound_key =
            UnboundKey::new(&AES_256_GCM, &self.key_bytes).map_err(|_| CryptoError::Encrypt)?;
        let key = LessSafeKey::new(unbound_key);

        let rng = SystemRandom::new();
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rng.fill(&mut nonce_bytes).map_err(|_| CryptoError::Encrypt)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.as_bytes().to_vec();
        key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Encrypt)?;

        // nonce (12 bytes) + ciphertext + tag
        let mut result = nonce_bytes.to_vec();
        result.extend_from_slice(&in_out);
        Ok(general_purpose::STANDARD.encode(&result))
    }

    /// Decrypts a sealed value, authenticating the 128-bit GCM tag. Any
    /// tamper, truncation, or key mismatch fails.
    pub fn open(&self, ciphertext: &str) -> Result<String> {
        let data = general_purpose::STANDARD
            .decode(ciphertext)
            .map_err(|_| CryptoError::InvalidCiphertext)?;
        if data.len() < NONCE_LEN + aead::AES_256_GCM.tag_len() {
            return Err(CryptoError::InvalidCiphertext);
        }

        let unbound_key =
            UnboundKey::new(&AES_256_GCM, &self.key_bytes).map_err(|_| CryptoError::Decrypt)?;
        let key = LessSafeKey::new(unbound_key);

        let (nonce_bytes, sealed) = data.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| CryptoError::InvalidCiphertext)?;

        let mut in_out = sealed.to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Decrypt)?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::Decrypt)
    }
}

/// Masks a secret for display: `"****"` plus the last four characters, or
/// just `"****"` when the value is shorter than five. Lossy by design.
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() < 5 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}

/// Constant-time comparison to prevent timing side channels. Always walks
/// all bytes once the lengths match.
pub fn constant_time_equal(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// A credential opened for the duration of one probe. Never stored, never
/// logged; drop it as soon as the request is built.
pub struct DecryptedCredential {
    pub kind: CredentialKind,
    pub value: String,
    pub username: Option<String>,
    pub header_name: Option<String>,
}

impl DecryptedCredential {
    /// Projects the credential onto the request header it occupies.
    pub fn header(&self) -> (String, String) {
        match self.kind {
            CredentialKind::BearerToken => {
                ("Authorization".to_string(), format!("Bearer {}", self.value))
            }
            CredentialKind::ApiKey => {
                let name = self
                    .header_name
                    .clone()
                    .unwrap_or_else(|| "X-API-Key".to_string());
                (name, self.value.clone())
            }
            CredentialKind::BasicAuth => {
                let user = self.username.as_deref().unwrap_or_default();
                let raw = format!("{user}:{}", self.value);
                let encoded = general_purpose::STANDARD.encode(raw.as_bytes());
                ("Authorization".to_string(), format!("Basic {encoded}"))
            }
        }
    }
}
