//! Optional payload encryption for transfers.
//!
//! The cipher layer is a pre-shared-key AES-256-GCM transform applied to
//! transfer chunks. Both peers derive the same key from a passphrase agreed
//! out of band; there is no negotiation step. Text mode and the sentinel
//! are never encrypted, so mode detection stays exact.
//!
//! # Nonces
//!
//! Each transfer uses a fresh random 8-byte nonce base, announced in the
//! offer. The per-chunk nonce is the base followed by a 4-byte big-endian
//! chunk counter, so both sides derive identical nonces from chunk position
//! alone and no nonce ever repeats under one key within a transfer.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{ProtocolError, Result};

/// AES-256 key length in bytes.
pub const KEY_LENGTH: usize = 32;

/// Length of the per-transfer random nonce base.
pub const NONCE_BASE_LENGTH: usize = 8;

/// AES-GCM nonce length: nonce base plus a 4-byte chunk counter.
pub const NONCE_LENGTH: usize = 12;

/// Ciphertext overhead per chunk (the GCM authentication tag).
pub const TAG_OVERHEAD: usize = 16;

/// The symmetric transform applied to a connection's transfer payload.
///
/// Defaults to the identity transform (no key). Setting a key makes every
/// subsequent transfer on the connection encrypted.
#[derive(Clone, Default)]
pub struct CipherLayer {
    key: Option<[u8; KEY_LENGTH]>,
}

impl CipherLayer {
    /// The identity transform: chunks pass through unchanged.
    pub fn identity() -> Self {
        Self { key: None }
    }

    /// Derive a key from a shared passphrase.
    ///
    /// Both peers must run the same derivation on the same passphrase; the
    /// key itself never crosses the wire.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let hash = Sha256::digest(passphrase.as_bytes());
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&hash);
        Self { key: Some(key) }
    }

    /// Use raw key material directly.
    pub fn from_key(key: [u8; KEY_LENGTH]) -> Self {
        Self { key: Some(key) }
    }

    /// Whether a key is set (false means identity).
    pub fn is_active(&self) -> bool {
        self.key.is_some()
    }

    /// Start sealing a new transfer with a fresh random nonce base.
    ///
    /// Returns `None` when no key is set.
    pub fn begin_seal(&self) -> Option<TransferCipher> {
        let key = self.key?;
        let mut nonce_base = [0u8; NONCE_BASE_LENGTH];
        OsRng.fill_bytes(&mut nonce_base);
        Some(TransferCipher::new(&key, nonce_base))
    }

    /// Start opening a transfer sealed by the peer under the announced
    /// nonce base.
    ///
    /// Returns `None` when no key is set.
    pub fn begin_open(&self, nonce_base: [u8; NONCE_BASE_LENGTH]) -> Option<TransferCipher> {
        let key = self.key?;
        Some(TransferCipher::new(&key, nonce_base))
    }
}

impl std::fmt::Debug for CipherLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherLayer")
            .field(
                "key",
                &if self.key.is_some() {
                    "[REDACTED]"
                } else {
                    "[none]"
                },
            )
            .finish()
    }
}

/// Per-transfer cipher state: the keyed AEAD plus the chunk counter.
///
/// Chunks must be sealed and opened in the same order on both sides; the
/// counter is the only state shared between them.
pub struct TransferCipher {
    cipher: Aes256Gcm,
    nonce_base: [u8; NONCE_BASE_LENGTH],
    counter: u32,
}

impl TransferCipher {
    fn new(key: &[u8; KEY_LENGTH], nonce_base: [u8; NONCE_BASE_LENGTH]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self {
            cipher: Aes256Gcm::new(key),
            nonce_base,
            counter: 0,
        }
    }

    /// The nonce base to announce in the transfer offer.
    pub fn nonce_base(&self) -> [u8; NONCE_BASE_LENGTH] {
        self.nonce_base
    }

    /// Seal the next chunk. Output is plaintext length plus [`TAG_OVERHEAD`].
    pub fn seal_chunk(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = self.next_nonce()?;
        self.cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| ProtocolError::Encryption(format!("chunk {}: {e}", self.counter - 1)))
    }

    /// Open the next chunk sealed by the peer.
    ///
    /// Fails if the chunk was tampered with, sealed under a different key,
    /// or arrives out of order.
    pub fn open_chunk(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let nonce = self.next_nonce()?;
        self.cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|e| ProtocolError::Decryption(format!("chunk {}: {e}", self.counter - 1)))
    }

    fn next_nonce(&mut self) -> Result<[u8; NONCE_LENGTH]> {
        let counter = self.counter;
        self.counter = counter
            .checked_add(1)
            .ok_or_else(|| ProtocolError::Encryption("chunk counter exhausted".to_string()))?;

        let mut nonce = [0u8; NONCE_LENGTH];
        nonce[..NONCE_BASE_LENGTH].copy_from_slice(&self.nonce_base);
        nonce[NONCE_BASE_LENGTH..].copy_from_slice(&counter.to_be_bytes());
        Ok(nonce)
    }
}

impl std::fmt::Debug for TransferCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferCipher")
            .field("nonce_base", &self.nonce_base)
            .field("counter", &self.counter)
            .finish()
    }
}
