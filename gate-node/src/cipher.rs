use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use sha2::{Digest, Sha256};

use crate::error::{GateError, Result};

/// Symmetric sealing of text payloads.
///
/// Session cookies and bearer tokens are the enciphered form of a small
/// plaintext record; verification starts by deciphering. Implementations
/// must be authenticated: a tampered sealed value has to fail `decipher`
/// rather than decode to attacker-chosen plaintext.
pub trait Cipher: Send + Sync {
    fn encipher(&self, plaintext: &str) -> Result<String>;
    fn decipher(&self, sealed: &str) -> Result<String>;
}

const NONCE_LEN: usize = 12;

/// ChaCha20-Poly1305 sealing with a key derived from a key string.
///
/// The sealed form is URL-safe base64 over `nonce || ciphertext`, with a
/// fresh random nonce per sealing, so it is safe to place in cookie values
/// and `Authorization` headers.
pub struct SealingCipher {
    cipher: ChaCha20Poly1305,
}

impl SealingCipher {
    pub fn new(key_material: &str) -> Self {
        let digest = Sha256::digest(key_material.as_bytes());
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&digest)),
        }
    }
}

impl Cipher for SealingCipher {
    fn encipher(&self, plaintext: &str) -> Result<String> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| GateError::Cipher("sealing failed".to_string()))?;
        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    fn decipher(&self, sealed: &str) -> Result<String> {
        let raw = URL_SAFE_NO_PAD
            .decode(sealed)
            .map_err(|err| GateError::Cipher(format!("sealed value is not base64: {err}")))?;
        if raw.len() <= NONCE_LEN {
            return Err(GateError::Cipher("sealed value too short".to_string()));
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| GateError::Cipher("authentication tag mismatch".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|_| GateError::Cipher("plaintext is not UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let cipher = SealingCipher::new("test-key");
        let sealed = cipher.encipher("5:alice:0:0:0:pw").unwrap();
        assert_ne!(sealed, "5:alice:0:0:0:pw");
        assert_eq!(cipher.decipher(&sealed).unwrap(), "5:alice:0:0:0:pw");
    }

    #[test]
    fn test_fresh_nonce_per_sealing() {
        let cipher = SealingCipher::new("test-key");
        let a = cipher.encipher("payload").unwrap();
        let b = cipher.encipher("payload").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampering_fails_closed() {
        let cipher = SealingCipher::new("test-key");
        let sealed = cipher.encipher("payload").unwrap();
        let mut raw = URL_SAFE_NO_PAD.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(raw);
        assert!(cipher.decipher(&tampered).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = SealingCipher::new("key-one").encipher("payload").unwrap();
        assert!(SealingCipher::new("key-two").decipher(&sealed).is_err());
    }

    #[test]
    fn test_garbage_input_fails() {
        let cipher = SealingCipher::new("test-key");
        assert!(cipher.decipher("not base64 !!!").is_err());
        assert!(cipher.decipher("").is_err());
        assert!(cipher.decipher("AAAA").is_err());
    }
}
