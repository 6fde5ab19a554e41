//! Per-field cipher for the patcher sync channel.
//!
//! Every semantically meaningful value crossing the channel (branch names,
//! status codes, messages, the greeting) is sealed on its own; the JSON
//! structure around the values stays in the clear. A token is
//! `base64(nonce || AES-256-GCM ciphertext)` under a key derived from the
//! shared secret with HKDF-SHA256.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("token is not valid base64")]
    Encoding(#[from] base64::DecodeError),
    #[error("token shorter than a nonce")]
    Truncated,
    #[error("token failed authentication")]
    Unauthenticated,
    #[error("plaintext is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Clone)]
pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl FieldCipher {
    pub fn new(secret: &str) -> Self {
        let hkdf = Hkdf::<Sha256>::new(None, secret.as_bytes());
        let mut key = [0u8; 32];
        hkdf.expand(&[], &mut key)
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        Self {
            cipher: Aes256Gcm::new_from_slice(&key).expect("derived key is 32 bytes"),
        }
    }

    pub fn encrypt(&self, plain: &str) -> String {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = self
            .cipher
            .encrypt(nonce, plain.as_bytes())
            .expect("sealing in-memory buffers cannot fail");

        let mut token = Vec::with_capacity(NONCE_LEN + sealed.len());
        token.extend_from_slice(&nonce_bytes);
        token.extend_from_slice(&sealed);
        BASE64.encode(token)
    }

    pub fn decrypt(&self, token: &str) -> Result<String, CipherError> {
        let raw = BASE64.decode(token.trim())?;
        if raw.len() < NONCE_LEN {
            return Err(CipherError::Truncated);
        }

        let nonce = Nonce::from_slice(&raw[..NONCE_LEN]);
        let plain = self
            .cipher
            .decrypt(nonce, &raw[NONCE_LEN..])
            .map_err(|_| CipherError::Unauthenticated)?;

        Ok(String::from_utf8(plain)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trip_plain_text() {
        let cipher = FieldCipher::new("a shared secret");
        let token = cipher.encrypt("release/2024-summer");
        assert_ne!(token, "release/2024-summer");
        assert_eq!(cipher.decrypt(&token).unwrap(), "release/2024-summer");
    }

    #[test]
    fn round_trip_empty_string() {
        let cipher = FieldCipher::new("a shared secret");
        assert_eq!(cipher.decrypt(&cipher.encrypt("")).unwrap(), "");
    }

    #[test]
    fn nonces_make_tokens_unique() {
        let cipher = FieldCipher::new("a shared secret");
        assert_ne!(cipher.encrypt("same"), cipher.encrypt("same"));
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let ours = FieldCipher::new("a shared secret");
        let theirs = FieldCipher::new("another secret");
        let token = theirs.encrypt("greeting");
        assert!(matches!(
            ours.decrypt(&token),
            Err(CipherError::Unauthenticated)
        ));
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        let cipher = FieldCipher::new("a shared secret");
        assert!(cipher.decrypt("not base64 !!!").is_err());
        assert!(matches!(
            cipher.decrypt(&BASE64.encode([0u8; 4])),
            Err(CipherError::Truncated)
        ));
    }

    proptest! {
        #[test]
        fn round_trip_any_text(plain in "\\PC*") {
            let cipher = FieldCipher::new("property secret");
            prop_assert_eq!(cipher.decrypt(&cipher.encrypt(&plain)).unwrap(), plain);
        }
    }
}
