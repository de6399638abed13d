//! Request and reply messages exchanged with the key service.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use keywarden_common::{Error, ErrorKind, StoreId};
use keywarden_crypto::{AadOverrides, WrappedBlob};
use keywarden_keyring::DeviceKeyMaterial;

/// One request to the key service, tagged by `op`.
///
/// KEK sources and envelopes stay as raw JSON here and are parsed by the
/// service, so malformed key material is reported with the operation's own
/// error kind rather than as an unknown operation.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all_fields = "camelCase")]
pub enum Request {
    HasKek,
    GetDevicePublicKey,
    ImportDeviceKeys {
        /// JWK as a JSON object, or as JSON text.
        private_key_jwk: Value,
        public_key_raw_base64: String,
    },
    ExportDeviceKeys,
    ProvisionKek {
        #[serde(flatten)]
        source: Map<String, Value>,
    },
    RewrapCek {
        wrapped_cek: WrappedBlob,
        new_kek_delivery: Value,
    },
    EnsureCek {
        store: StoreId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wrapped_cek: Option<WrappedBlob>,
    },
    WrapCek {
        store: StoreId,
    },
    RewrapStore {
        store: StoreId,
        new_kek_delivery: Value,
    },
    Encrypt {
        store: StoreId,
        id: Value,
        record: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        overrides: Option<AadOverrides>,
    },
    Decrypt {
        store: StoreId,
        envelope: Value,
    },
    Zeroize,
    ResetDeviceIdentity,
    Status,
}

impl Request {
    /// Operation name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Request::HasKek => "HasKek",
            Request::GetDevicePublicKey => "GetDevicePublicKey",
            Request::ImportDeviceKeys { .. } => "ImportDeviceKeys",
            Request::ExportDeviceKeys => "ExportDeviceKeys",
            Request::ProvisionKek { .. } => "ProvisionKek",
            Request::RewrapCek { .. } => "RewrapCek",
            Request::EnsureCek { .. } => "EnsureCek",
            Request::WrapCek { .. } => "WrapCek",
            Request::RewrapStore { .. } => "RewrapStore",
            Request::Encrypt { .. } => "Encrypt",
            Request::Decrypt { .. } => "Decrypt",
            Request::Zeroize => "Zeroize",
            Request::ResetDeviceIdentity => "ResetDeviceIdentity",
            Request::Status => "Status",
        }
    }
}

/// Only the operation name is shown; params may carry key material or
/// plaintext records.
impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("op", &self.name())
            .finish_non_exhaustive()
    }
}

/// Build device key material from the wire form of an import request.
pub(crate) fn import_material(
    private_key_jwk: Value,
    public_key_raw_base64: String,
) -> DeviceKeyMaterial {
    let private_key_jwk = match private_key_jwk {
        Value::String(text) => text,
        other => other.to_string(),
    };
    DeviceKeyMaterial {
        private_key_jwk,
        public_key_raw_base64,
    }
}

/// Outcome half of a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Ok { result: Value },
    Error { kind: ErrorKind, message: String },
}

/// One reply line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Caller correlation id, echoed verbatim.
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Reply {
    pub fn success(request_id: Option<Value>, result: Value) -> Self {
        Self {
            request_id,
            outcome: Outcome::Ok { result },
        }
    }

    pub fn failure(request_id: Option<Value>, err: &Error) -> Self {
        Self {
            request_id,
            outcome: Outcome::Error {
                kind: err.kind(),
                message: err.to_string(),
            },
        }
    }

    pub fn from_result(request_id: Option<Value>, result: keywarden_common::Result<Value>) -> Self {
        match result {
            Ok(value) => Self::success(request_id, value),
            Err(err) => Self::failure(request_id, &err),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, Outcome::Ok { .. })
    }

    /// Error kind, if this reply is a failure.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            Outcome::Ok { .. } => None,
            Outcome::Error { kind, .. } => Some(*kind),
        }
    }

    /// Result payload, if this reply is a success.
    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Ok { result } => Some(result),
            Outcome::Error { .. } => None,
        }
    }
}
