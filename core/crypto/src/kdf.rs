//! Key derivation using HKDF-SHA256.
//!
//! Used to turn an ECDH shared secret into the AES key that opens a KEK
//! delivery payload.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::keys::KEY_LENGTH;
use keywarden_common::{Error, Result};

/// HKDF info string for KEK delivery payloads.
pub const KEK_DELIVERY_INFO: &[u8] = b"keywarden:kek-delivery:v1";

/// Derive a 256-bit key using HKDF-SHA256.
///
/// # Preconditions
/// - `ikm` must not be empty
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
/// - The returned buffer is zeroized on drop
///
/// # Errors
/// - Returns error if `ikm` is empty or expansion fails
pub fn derive_key(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<Zeroizing<[u8; KEY_LENGTH]>> {
    if ikm.is_empty() {
        return Err(Error::InvalidInput(
            "Input keying material cannot be empty".to_string(),
        ));
    }

    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = Zeroizing::new([0u8; KEY_LENGTH]);
    hk.expand(info, &mut okm[..])
        .map_err(|e| Error::Crypto(format!("HKDF expand failed: {}", e)))?;

    Ok(okm)
}
