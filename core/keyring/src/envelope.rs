//! Envelope cipher: authenticated encryption of individual records.
//!
//! Each record is serialized to JSON and sealed with AES-256-GCM under its
//! store's CEK. The associated data is the canonical form of an
//! [`AadContext`] derived from the record, and the context travels inside the
//! envelope so decryption can rebuild the identical bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::cek::CekRegistry;
use crate::config::HealPolicy;
use crate::heal::{run_bounded, DecryptAttempt, EncryptAttempt};
use keywarden_common::{Error, Result, StoreId};
use keywarden_crypto::codec::b64;
use keywarden_crypto::{AadContext, AadOverrides, Cek};

/// Algorithm identifier carried by every envelope.
pub const ALG_A256GCM: &str = "A256GCM";

/// Persisted form of one encrypted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Value,
    pub enc: EncryptedRecord,
    pub meta: EnvelopeMeta,
}

/// Ciphertext and the parameters needed to open it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    pub alg: String,
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64")]
    pub tag: Vec<u8>,
    /// Associated-data context; absent for envelopes sealed without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aad: Option<AadContext>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMeta {
    pub updated_at: DateTime<Utc>,
}

impl Envelope {
    /// Parse an envelope received from outside the service.
    ///
    /// # Errors
    /// - `DecryptFailed` if the value is not a well-formed envelope,
    ///   including an `aad` with unknown fields or mistyped values
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::DecryptFailed(format!("Malformed envelope: {}", e)))
    }
}

/// Seal one record under `cek`.
pub fn seal(cek: &Cek, id: Value, record: &Value, aad: Option<AadContext>) -> Result<Envelope> {
    let plaintext = Zeroizing::new(serde_json::to_vec(record)?);
    let aad_bytes = aad.as_ref().map(AadContext::canonical_bytes).transpose()?;

    let sealed = cek.seal(&plaintext, aad_bytes.as_deref())?;
    let iv = sealed.iv.to_vec();
    let (ciphertext, tag) = sealed.split_tag();

    Ok(Envelope {
        id,
        enc: EncryptedRecord {
            alg: ALG_A256GCM.to_string(),
            iv,
            ciphertext,
            tag,
            aad,
        },
        meta: EnvelopeMeta {
            updated_at: Utc::now(),
        },
    })
}

/// Open one envelope under `cek` with the given associated data.
pub fn open(cek: &Cek, envelope: &Envelope, aad: Option<&AadContext>) -> Result<Value> {
    if envelope.enc.alg != ALG_A256GCM {
        return Err(Error::DecryptFailed(format!(
            "Unsupported algorithm: {}",
            envelope.enc.alg
        )));
    }

    let aad_bytes = aad.map(AadContext::canonical_bytes).transpose()?;
    let combined = [envelope.enc.ciphertext.as_slice(), envelope.enc.tag.as_slice()].concat();
    let plaintext = Zeroizing::new(cek.open(&envelope.enc.iv, &combined, aad_bytes.as_deref())?);

    serde_json::from_slice(&plaintext)
        .map_err(|e| Error::DecryptFailed(format!("Decrypted record is not valid JSON: {}", e)))
}

/// Map a cipher fault that survived every retry to the terminal error kind.
fn terminal(err: Error, kind: fn(String) -> Error) -> Error {
    match err {
        Error::CipherOperation(msg) | Error::Crypto(msg) => kind(msg),
        other => other,
    }
}

/// Encrypt a record for `store`, creating the store's CEK if needed.
///
/// The AAD context is derived from the record and `overrides` is merged on
/// top. On a key-desync fault the attempts in `policy` are walked in order.
///
/// # Errors
/// - `EncryptFailed` once every planned attempt hit a cipher fault
pub fn encrypt_record(
    registry: &mut CekRegistry,
    policy: &HealPolicy,
    store: &StoreId,
    id: Value,
    record: &Value,
    overrides: Option<&AadOverrides>,
) -> Result<Envelope> {
    encrypt_record_with(registry, policy, store, id, record, overrides, seal)
}

/// [`encrypt_record`] with the sealing step supplied by the caller.
fn encrypt_record_with<S>(
    registry: &mut CekRegistry,
    policy: &HealPolicy,
    store: &StoreId,
    id: Value,
    record: &Value,
    overrides: Option<&AadOverrides>,
    mut seal: S,
) -> Result<Envelope>
where
    S: FnMut(&Cek, Value, &Value, Option<AadContext>) -> Result<Envelope>,
{
    if registry.get(store).is_none() {
        info!(store = %store, "No CEK registered; generating one for encrypt");
        registry.ensure(store, None, None)?;
    }

    let mut aad = AadContext::from_record(store.as_str(), id.clone(), record);
    if let Some(overrides) = overrides {
        aad = aad.with_overrides(overrides);
    }

    let plan = policy.encrypt_plan();
    let envelope = run_bounded("encrypt", &plan, |step| match step {
        EncryptAttempt::Primary => {
            seal(registry.require(store)?, id.clone(), record, Some(aad.clone()))
        }
        EncryptAttempt::RegeneratedCek => {
            seal(registry.regenerate(store), id.clone(), record, Some(aad.clone()))
        }
        EncryptAttempt::WithoutAad => seal(registry.require(store)?, id.clone(), record, None),
    })
    .map_err(|e| terminal(e, Error::EncryptFailed))?;

    debug!(store = %store, "Encrypted record");
    Ok(envelope)
}

/// Decrypt an envelope for `store`. Never creates a CEK.
///
/// Envelopes carrying an AAD context are opened with exactly that context.
/// Envelopes without one are opened first with the default `{table, id}`
/// context and, on the retry, with no associated data.
///
/// # Errors
/// - `CekNotReady` if no CEK is registered for `store`
/// - `DecryptFailed` if authentication fails on every planned attempt
pub fn decrypt_record(
    registry: &CekRegistry,
    policy: &HealPolicy,
    store: &StoreId,
    envelope: &Envelope,
) -> Result<Value> {
    let cek = registry.require(store)?;
    let default_aad = AadContext::new(store.as_str(), envelope.id.clone());

    let plan = policy.decrypt_plan();
    let record = run_bounded("decrypt", &plan, |step| {
        let aad = match (&envelope.enc.aad, step) {
            (Some(recorded), _) => Some(recorded),
            (None, DecryptAttempt::Primary) => Some(&default_aad),
            (None, DecryptAttempt::SameKeyRetry) => None,
        };
        open(cek, envelope, aad)
    })
    .map_err(|e| terminal(e, Error::DecryptFailed))?;

    debug!(store = %store, "Decrypted record");
    Ok(record)
}
