use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption key must be 64 hex chars (32 bytes)")]
    InvalidKey,
    #[error("invalid ciphertext")]
    InvalidCiphertext,
}

/// AES-256-GCM envelope for credentials and OAuth tokens.
///
/// Wire layout: `base64(iv ‖ tag ‖ ciphertext)` with a 12-byte random IV
/// and 16-byte tag. The aead crate appends the tag to the ciphertext, so
/// seal/unseal re-split it into the wire order.
#[derive(Clone)]
pub struct CredentialCipher {
    key: [u8; 32],
}

impl CredentialCipher {
    pub fn from_hex(hex: &str) -> Result<Self, CryptoError> {
        let hex = hex.trim();
        if hex.len() != 64 {
            return Err(CryptoError::InvalidKey);
        }
        let mut key = [0u8; 32];
        for (i, byte) in key.iter_mut().enumerate() {
            let pair = &hex[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(pair, 16).map_err(|_| CryptoError::InvalidKey)?;
        }
        Ok(Self { key })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::InvalidKey)?;
        let iv = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&iv, plaintext.as_bytes())
            .map_err(|_| CryptoError::InvalidCiphertext)?;
        let (body, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        let mut combined = Vec::with_capacity(IV_LEN + sealed.len());
        combined.extend_from_slice(&iv);
        combined.extend_from_slice(tag);
        combined.extend_from_slice(body);
        Ok(STANDARD.encode(combined))
    }

    pub fn decrypt(&self, sealed: &str) -> Result<String, CryptoError> {
        let combined = STANDARD
            .decode(sealed.trim())
            .map_err(|_| CryptoError::InvalidCiphertext)?;
        if combined.len() < IV_LEN + TAG_LEN {
            return Err(CryptoError::InvalidCiphertext);
        }
        let (iv, rest) = combined.split_at(IV_LEN);
        let (tag, body) = rest.split_at(TAG_LEN);

        let mut ciphertext = Vec::with_capacity(body.len() + TAG_LEN);
        ciphertext.extend_from_slice(body);
        ciphertext.extend_from_slice(tag);

        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::InvalidKey)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(iv), ciphertext.as_ref())
            .map_err(|_| CryptoError::InvalidCiphertext)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidCiphertext)
    }
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn roundtrip() {
        let cipher = CredentialCipher::from_hex(KEY).unwrap();
        let sealed = cipher.encrypt("sk-upstream-secret").unwrap();
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "sk-upstream-secret");
    }

    #[test]
    fn iv_is_not_reused() {
        let cipher = CredentialCipher::from_hex(KEY).unwrap();
        let a = cipher.encrypt("same input").unwrap();
        let b = cipher.encrypt("same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampering_any_byte_fails() {
        let cipher = CredentialCipher::from_hex(KEY).unwrap();
        let sealed = cipher.encrypt("payload").unwrap();
        let mut raw = STANDARD.decode(&sealed).unwrap();
        for i in 0..raw.len() {
            raw[i] ^= 0x01;
            let tampered = STANDARD.encode(&raw);
            assert_eq!(
                cipher.decrypt(&tampered),
                Err(CryptoError::InvalidCiphertext),
                "byte {i} flip must not decrypt"
            );
            raw[i] ^= 0x01;
        }
    }

    #[test]
    fn short_input_is_rejected() {
        let cipher = CredentialCipher::from_hex(KEY).unwrap();
        let short = STANDARD.encode([0u8; 27]);
        assert_eq!(cipher.decrypt(&short), Err(CryptoError::InvalidCiphertext));
        assert_eq!(
            cipher.decrypt("not base64 !!!"),
            Err(CryptoError::InvalidCiphertext)
        );
    }

    #[test]
    fn malformed_key_is_rejected() {
        assert_eq!(
            CredentialCipher::from_hex("deadbeef").unwrap_err(),
            CryptoError::InvalidKey
        );
        assert_eq!(
            CredentialCipher::from_hex(&"zz".repeat(32)).unwrap_err(),
            CryptoError::InvalidKey
        );
    }
}
