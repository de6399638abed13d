//! Authenticated encryption using AES-256-GCM.
//!
//! Every call draws a fresh 96-bit IV from the OS RNG, so an IV is never
//! reused with the same key. Associated data is optional; a ciphertext sealed
//! with associated data only opens with byte-identical associated data.

use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};

use crate::keys::KEY_LENGTH;
use keywarden_common::{Error, Result};

/// IV size for AES-GCM (12 bytes).
pub const IV_SIZE: usize = 12;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Output of a single seal operation.
#[derive(Debug, Clone)]
pub struct Sealed {
    /// Random IV used for this operation.
    pub iv: [u8; IV_SIZE],
    /// Ciphertext with the tag appended.
    pub ciphertext: Vec<u8>,
}

impl Sealed {
    /// Split into ciphertext and the trailing authentication tag.
    pub fn split_tag(mut self) -> (Vec<u8>, Vec<u8>) {
        let tag = self.ciphertext.split_off(self.ciphertext.len() - TAG_SIZE);
        (self.ciphertext, tag)
    }
}

/// Encrypt plaintext using AES-256-GCM.
///
/// # Postconditions
/// - The IV is randomly generated
/// - The ciphertext length is plaintext length + TAG_SIZE
///
/// # Errors
/// - `CipherOperation` if the cipher rejects the operation
pub fn encrypt(key: &[u8; KEY_LENGTH], plaintext: &[u8], aad: Option<&[u8]>) -> Result<Sealed> {
    let cipher = Aes256Gcm::new(GenericArray::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad: aad.unwrap_or_default(),
            },
        )
        .map_err(|e| Error::CipherOperation(format!("Encryption failed: {}", e)))?;

    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(&nonce);

    Ok(Sealed { iv, ciphertext })
}

/// Decrypt ciphertext using AES-256-GCM.
///
/// # Preconditions
/// - `iv` must be IV_SIZE bytes
/// - `ciphertext` must carry the tag at its end
///
/// # Errors
/// - `Crypto` if the IV or ciphertext is malformed
/// - `CipherOperation` if authentication fails (wrong key, wrong associated
///   data, or tampered data)
///
/// # Security
/// - Authenticates before returning any plaintext
pub fn decrypt(
    key: &[u8; KEY_LENGTH],
    iv: &[u8],
    ciphertext: &[u8],
    aad: Option<&[u8]>,
) -> Result<Vec<u8>> {
    if iv.len() != IV_SIZE {
        return Err(Error::Crypto(format!(
            "Invalid IV length: expected {}, got {}",
            IV_SIZE,
            iv.len()
        )));
    }

    if ciphertext.len() < TAG_SIZE {
        return Err(Error::Crypto("Ciphertext too short".to_string()));
    }

    let cipher = Aes256Gcm::new(GenericArray::from_slice(key));

    cipher
        .decrypt(
            Nonce::from_slice(iv),
            Payload {
                msg: ciphertext,
                aad: aad.unwrap_or_default(),
            },
        )
        .map_err(|e| Error::CipherOperation(format!("Decryption failed: {}", e)))
}
