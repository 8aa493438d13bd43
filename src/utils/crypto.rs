//! # Frame Body Encryption
//!
//! Optional encryption of compressed frame bodies. When a messenger or a
//! context has no [`CryptographyProvider`], bodies are sent in the clear.
//!
//! The built-in [`ChaChaCryptography`] provider uses XChaCha20-Poly1305 with a
//! fresh random 24-byte nonce per frame, prepended to the ciphertext:
//!
//! ```text
//! [Nonce(24)] [Ciphertext + Tag(16)]
//! ```

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use zeroize::Zeroize;

use crate::error::{ProtocolError, Result};
use crate::protocol::context::Context;

/// Length of the nonce prepended to every encrypted body
pub const NONCE_SIZE: usize = 24;

/// Encryption applied to compressed frame bodies.
pub trait CryptographyProvider: Send + Sync {
    /// Encrypt a frame body before it is framed.
    fn encrypt(&self, context: &Context, data: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt a frame body after its checksum has been verified.
    fn decrypt(&self, context: &Context, data: &[u8]) -> Result<Vec<u8>>;
}

/// AEAD cipher wrapper with a fixed key.
pub struct Crypto {
    cipher: XChaCha20Poly1305,
}

impl Crypto {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// Generate a random nonce from the operating system RNG
    pub fn generate_nonce() -> Result<[u8; NONCE_SIZE]> {
        let mut nonce = [0u8; NONCE_SIZE];
        getrandom::fill(&mut nonce).map_err(|_| ProtocolError::EncryptionFailure)?;
        Ok(nonce)
    }

    pub fn encrypt(&self, data: &[u8], nonce: &[u8; NONCE_SIZE]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(XNonce::from_slice(nonce), data)
            .map_err(|_| ProtocolError::EncryptionFailure)
    }

    pub fn decrypt(&self, data: &[u8], nonce: &[u8; NONCE_SIZE]) -> Result<Vec<u8>> {
        self.cipher
            .decrypt(XNonce::from_slice(nonce), data)
            .map_err(|_| ProtocolError::DecryptionFailure)
    }
}

/// Pre-shared-key provider built on [`Crypto`].
pub struct ChaChaCryptography {
    crypto: Crypto,
}

impl ChaChaCryptography {
    /// Build a provider from a 32-byte key. The caller's copy is zeroized.
    pub fn new(mut key: [u8; 32]) -> Self {
        let provider = Self {
            crypto: Crypto::new(&key),
        };
        key.zeroize();
        provider
    }
}

impl CryptographyProvider for ChaChaCryptography {
    fn encrypt(&self, _context: &Context, data: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = Crypto::generate_nonce()?;
        let ciphertext = self.crypto.encrypt(data, &nonce)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend(ciphertext);
        nonce.zeroize();
        Ok(out)
    }

    fn decrypt(&self, _context: &Context, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_SIZE {
            return Err(ProtocolError::DecryptionFailure);
        }
        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(nonce);
        self.crypto.decrypt(ciphertext, &nonce_bytes)
    }
}
