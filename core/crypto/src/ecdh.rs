//! P-256 device keypair used to receive key deliveries.

use p256::ecdh::diffie_hellman;
use p256::elliptic_curve::rand_core::OsRng;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use std::fmt;
use zeroize::Zeroizing;

use crate::keys::KEY_LENGTH;
use keywarden_common::{Error, Result};

/// Length of an uncompressed SEC1 P-256 point.
pub const PUBLIC_KEY_LENGTH: usize = 65;

/// Long-lived ECDH keypair identifying this device.
#[derive(Clone)]
pub struct DeviceKeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl DeviceKeyPair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Rebuild a keypair from its transport form.
    ///
    /// # Errors
    /// - `KeyImportFailed` if either half is malformed or the private key does
    ///   not belong to the public key
    pub fn from_parts(private_jwk: &str, public_raw: &[u8]) -> Result<Self> {
        let secret = SecretKey::from_jwk_str(private_jwk)
            .map_err(|_| Error::KeyImportFailed("Malformed private key JWK".to_string()))?;
        let public = parse_public_key(public_raw)
            .map_err(|e| Error::KeyImportFailed(e.to_string()))?;

        if secret.public_key() != public {
            return Err(Error::KeyImportFailed(
                "Private key does not match public key".to_string(),
            ));
        }

        Ok(Self { secret, public })
    }

    /// Private half as a JWK string.
    pub fn to_private_jwk(&self) -> Zeroizing<String> {
        self.secret.to_jwk_string()
    }

    /// Public half as an uncompressed SEC1 point.
    pub fn public_key_raw(&self) -> Vec<u8> {
        self.public.to_encoded_point(false).as_bytes().to_vec()
    }

    /// ECDH with a peer public key; returns the shared x-coordinate.
    pub fn agree(&self, peer_raw: &[u8]) -> Result<Zeroizing<[u8; KEY_LENGTH]>> {
        let peer = parse_public_key(peer_raw)?;
        let shared = diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());

        let mut out = Zeroizing::new([0u8; KEY_LENGTH]);
        out.copy_from_slice(shared.raw_secret_bytes().as_slice());
        Ok(out)
    }
}

impl fmt::Debug for DeviceKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceKeyPair")
            .field("public", &crate::codec::encode(&self.public_key_raw()))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Parse a SEC1-encoded P-256 public key.
pub fn parse_public_key(raw: &[u8]) -> Result<PublicKey> {
    PublicKey::from_sec1_bytes(raw)
        .map_err(|_| Error::Crypto("Invalid P-256 public key".to_string()))
}
