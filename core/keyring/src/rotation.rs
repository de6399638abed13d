//! Rotation protocol: move wrapped CEKs from the current KEK to a new one.
//!
//! The new KEK is only used to wrap; it never becomes the active KEK here.
//! Callers provision it separately once every store has been rewrapped, so
//! a failure partway through leaves everything on the old KEK.

use tracing::info;

use crate::cek::CekRegistry;
use keywarden_common::{Error, Result, StoreId};
use keywarden_crypto::{Kek, WrappedBlob};

/// Rewrap a persisted CEK blob from `current` to `next`.
///
/// # Errors
/// - `KeyImportFailed` if the blob does not open under `current`
pub fn rewrap_blob(current: &Kek, blob: &WrappedBlob, next: &Kek) -> Result<WrappedBlob> {
    let rewrapped = current.rewrap_cek(blob, next).map_err(|e| match e {
        Error::CipherOperation(msg) | Error::Crypto(msg) => Error::KeyImportFailed(format!(
            "Wrapped CEK did not open under the current KEK: {}",
            msg
        )),
        other => other,
    })?;
    info!("Rewrapped CEK blob");
    Ok(rewrapped)
}

/// Wrap the registered CEK for `store` under `next`.
///
/// `current` must be present even though the registered CEK is already in
/// the clear in memory; rotation is only meaningful with a provisioned KEK.
///
/// # Errors
/// - `KekNotProvisioned` if `current` is `None`
/// - `CekNotReady` if no CEK is registered for `store`
pub fn rewrap_registered(
    registry: &CekRegistry,
    store: &StoreId,
    current: Option<&Kek>,
    next: &Kek,
) -> Result<WrappedBlob> {
    current.ok_or(Error::KekNotProvisioned)?;
    let rewrapped = registry.wrap(store, next)?;
    info!(store = %store, "Rewrapped registered CEK");
    Ok(rewrapped)
}
