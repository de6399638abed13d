//! Symmetric key types with secure memory handling.
//!
//! Both key types zeroize their memory on drop and never expose their bytes
//! outside this crate. A [`Kek`] can only wrap and unwrap CEKs; a [`Cek`] can
//! only be handed to the record cipher.

use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::aead;
use crate::blob::WrappedBlob;
use keywarden_common::{Error, Result};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Copy a slice into a fixed-size key buffer.
fn key_array(bytes: &[u8]) -> Result<[u8; KEY_LENGTH]> {
    if bytes.len() != KEY_LENGTH {
        return Err(Error::Crypto(format!(
            "Invalid key length: expected {}, got {}",
            KEY_LENGTH,
            bytes.len()
        )));
    }
    let mut key = [0u8; KEY_LENGTH];
    key.copy_from_slice(bytes);
    Ok(key)
}

/// Key encryption key.
///
/// Used exclusively to wrap and unwrap CEK bytes.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Kek {
    key: [u8; KEY_LENGTH],
}

impl Kek {
    /// Create a KEK from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Create a KEK from a slice.
    ///
    /// # Errors
    /// - Returns error if the slice is not exactly KEY_LENGTH bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(Self { key: key_array(bytes)? })
    }

    /// Wrap a CEK under this KEK.
    ///
    /// # Postconditions
    /// - Returns a blob with a fresh IV; the tag is appended to the ciphertext
    pub fn wrap_cek(&self, cek: &Cek) -> Result<WrappedBlob> {
        let sealed = aead::encrypt(&self.key, &cek.key, None)?;
        Ok(WrappedBlob {
            iv: sealed.iv.to_vec(),
            ciphertext: sealed.ciphertext,
            tag: None,
        })
    }

    /// Unwrap a CEK previously wrapped under this KEK.
    ///
    /// # Errors
    /// - `CipherOperation` if the blob was not produced by this KEK or was tampered with
    /// - `Crypto` if the blob is malformed or does not contain a 256-bit key
    pub fn unwrap_cek(&self, blob: &WrappedBlob) -> Result<Cek> {
        let combined = blob.combined_ciphertext();
        let raw = Zeroizing::new(aead::decrypt(&self.key, &blob.iv, &combined, None)?);
        Cek::from_slice(&raw)
    }

    /// Move a wrapped CEK from this KEK to `next`.
    ///
    /// The CEK bytes exist only transiently inside this call.
    pub fn rewrap_cek(&self, blob: &WrappedBlob, next: &Kek) -> Result<WrappedBlob> {
        let cek = self.unwrap_cek(blob)?;
        next.wrap_cek(&cek)
    }
}

/// Constant-time comparison.
impl PartialEq for Kek {
    fn eq(&self, other: &Self) -> bool {
        self.key[..].ct_eq(&other.key[..]).into()
    }
}

impl Eq for Kek {}

impl fmt::Debug for Kek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Kek([REDACTED])")
    }
}

/// Content encryption key for one store.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Cek {
    key: [u8; KEY_LENGTH],
}

impl Cek {
    /// Create a CEK from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Create a CEK from a slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(Self { key: key_array(bytes)? })
    }

    /// Generate a random CEK.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Encrypt a record payload under this CEK.
    pub fn seal(&self, plaintext: &[u8], aad: Option<&[u8]>) -> Result<aead::Sealed> {
        aead::encrypt(&self.key, plaintext, aad)
    }

    /// Decrypt a record payload sealed under this CEK.
    ///
    /// # Errors
    /// - `CipherOperation` if authentication fails
    pub fn open(&self, iv: &[u8], ciphertext: &[u8], aad: Option<&[u8]>) -> Result<Vec<u8>> {
        aead::decrypt(&self.key, iv, ciphertext, aad)
    }
}

/// Constant-time comparison.
impl PartialEq for Cek {
    fn eq(&self, other: &Self) -> bool {
        self.key[..].ct_eq(&other.key[..]).into()
    }
}

impl Eq for Cek {}

impl fmt::Debug for Cek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cek([REDACTED])")
    }
}

/// Generate random key bytes for bootstrap provisioning.
pub fn generate_raw_key() -> Zeroizing<[u8; KEY_LENGTH]> {
    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    OsRng.fill_bytes(&mut key[..]);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let kek = Kek::from_bytes([1u8; KEY_LENGTH]);
        let cek = Cek::generate();

        let blob = kek.wrap_cek(&cek).unwrap();
        let unwrapped = kek.unwrap_cek(&blob).unwrap();

        assert_eq!(unwrapped, cek);
    }

    #[test]
    fn test_key_equality() {
        assert_eq!(Cek::from_bytes([3u8; KEY_LENGTH]), Cek::from_bytes([3u8; KEY_LENGTH]));
        assert_ne!(Cek::from_bytes([3u8; KEY_LENGTH]), Cek::from_bytes([4u8; KEY_LENGTH]));
        assert_eq!(Kek::from_bytes([5u8; KEY_LENGTH]), Kek::from_bytes([5u8; KEY_LENGTH]));
        assert_ne!(Kek::from_bytes([5u8; KEY_LENGTH]), Kek::from_bytes([6u8; KEY_LENGTH]));
    }

    #[test]
    fn test_wrapped_blob_never_contains_cek_bytes() {
        let kek = Kek::from_bytes([1u8; KEY_LENGTH]);
        let cek = Cek::from_bytes([0xAB; KEY_LENGTH]);

        let blob = kek.wrap_cek(&cek).unwrap();
        assert!(!blob
            .ciphertext
            .windows(KEY_LENGTH)
            .any(|w| w == cek.key));
    }

    #[test]
    fn test_unwrap_with_wrong_kek_is_cipher_fault() {
        let kek1 = Kek::from_bytes([1u8; KEY_LENGTH]);
        let kek2 = Kek::from_bytes([2u8; KEY_LENGTH]);
        let blob = kek1.wrap_cek(&Cek::generate()).unwrap();

        let err = kek2.unwrap_cek(&blob).unwrap_err();
        assert!(err.is_key_desync());
    }

    #[test]
    fn test_rewrap_preserves_cek() {
        let old = Kek::from_bytes([1u8; KEY_LENGTH]);
        let new = Kek::from_bytes([2u8; KEY_LENGTH]);
        let cek = Cek::generate();

        let blob = old.wrap_cek(&cek).unwrap();
        let rewrapped = old.rewrap_cek(&blob, &new).unwrap();

        assert_eq!(old.unwrap_cek(&blob).unwrap(), new.unwrap_cek(&rewrapped).unwrap());
        assert_ne!(rewrapped.iv, blob.iv);
        assert!(old.unwrap_cek(&rewrapped).is_err());
    }

    #[test]
    fn test_seal_open_with_aad() {
        let cek = Cek::generate();
        let sealed = cek.seal(b"record", Some(b"ctx".as_slice())).unwrap();

        let opened = cek
            .open(&sealed.iv, &sealed.ciphertext, Some(b"ctx".as_slice()))
            .unwrap();
        assert_eq!(opened, b"record");
        assert!(Cek::generate()
            .open(&sealed.iv, &sealed.ciphertext, Some(b"ctx".as_slice()))
            .unwrap_err()
            .is_key_desync());
    }

    #[test]
    fn test_from_slice_rejects_short_key() {
        assert!(Kek::from_slice(&[0u8; 16]).is_err());
        assert!(Cek::from_slice(&[0u8; 31]).is_err());
    }

    #[test]
    fn test_cek_generate() {
        let key1 = Cek::generate();
        let key2 = Cek::generate();

        assert_ne!(key1, key2);
    }

    #[test]
    fn test_debug_is_redacted() {
        assert_eq!(format!("{:?}", Kek::from_bytes([9u8; 32])), "Kek([REDACTED])");
        assert_eq!(format!("{:?}", Cek::generate()), "Cek([REDACTED])");
    }
}
