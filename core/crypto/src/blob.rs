//! Persisted and transported forms of wrapped keys.
//!
//! A [`WrappedBlob`] is a CEK sealed under the KEK. A [`KekDelivery`] is a KEK
//! sealed for this device by a key server: ECDH between the server's
//! ephemeral key and the device key, HKDF-SHA256 over the shared secret, then
//! AES-256-GCM over the raw KEK bytes.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::aead;
use crate::codec::{b64, b64_opt};
use crate::ecdh::DeviceKeyPair;
use crate::kdf::{derive_key, KEK_DELIVERY_INFO};
use crate::keys::{Kek, KEY_LENGTH};
use keywarden_common::{Error, Result};

/// Salt length used when sealing a delivery.
pub const DELIVERY_SALT_LENGTH: usize = 32;

/// AES-GCM sealed key bytes.
///
/// `ciphertext` normally carries the tag at its end. Producers that split the
/// tag out may set `tag`; it is appended again before decryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedBlob {
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64_opt")]
    pub tag: Option<Vec<u8>>,
}

impl WrappedBlob {
    /// Ciphertext with the tag appended.
    pub fn combined_ciphertext(&self) -> Vec<u8> {
        match &self.tag {
            Some(tag) => [self.ciphertext.as_slice(), tag.as_slice()].concat(),
            None => self.ciphertext.clone(),
        }
    }
}

/// A KEK delivered to this device by a key server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KekDelivery {
    #[serde(with = "b64")]
    pub ephemeral_public_key: Vec<u8>,
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    #[serde(flatten)]
    pub payload: WrappedBlob,
}

/// Open a delivery with the device key and return the delivered KEK.
///
/// # Errors
/// - `KekProvisionFailed` for a malformed ephemeral key, a payload that fails
///   authentication, or a payload that is not a 256-bit key
pub fn open_delivery(device: &DeviceKeyPair, delivery: &KekDelivery) -> Result<Kek> {
    let shared = device
        .agree(&delivery.ephemeral_public_key)
        .map_err(|e| Error::KekProvisionFailed(format!("Key agreement failed: {}", e)))?;
    let key = derive_key(&shared[..], &delivery.salt, KEK_DELIVERY_INFO)
        .map_err(|e| Error::KekProvisionFailed(format!("Key derivation failed: {}", e)))?;

    let raw = Zeroizing::new(
        aead::decrypt(
            &key,
            &delivery.payload.iv,
            &delivery.payload.combined_ciphertext(),
            None,
        )
        .map_err(|e| Error::KekProvisionFailed(format!("Delivery payload rejected: {}", e)))?,
    );

    if raw.len() != KEY_LENGTH {
        return Err(Error::KekProvisionFailed(format!(
            "Delivered key has {} bytes, expected {}",
            raw.len(),
            KEY_LENGTH
        )));
    }

    debug!("Opened KEK delivery");
    Kek::from_slice(&raw)
}

/// Seal raw KEK bytes for a device public key.
///
/// This is the key-server half of the delivery protocol, used by tooling and
/// tests that stand in for the server.
pub fn seal_delivery(recipient_public_raw: &[u8], kek: &[u8; KEY_LENGTH]) -> Result<KekDelivery> {
    let ephemeral = DeviceKeyPair::generate();
    let shared = ephemeral.agree(recipient_public_raw)?;

    let mut salt = vec![0u8; DELIVERY_SALT_LENGTH];
    OsRng.fill_bytes(&mut salt);

    let key = derive_key(&shared[..], &salt, KEK_DELIVERY_INFO)?;
    let sealed = aead::encrypt(&key, kek, None)?;

    Ok(KekDelivery {
        ephemeral_public_key: ephemeral.public_key_raw(),
        salt,
        payload: WrappedBlob {
            iv: sealed.iv.to_vec(),
            ciphertext: sealed.ciphertext,
            tag: None,
        },
    })
}
