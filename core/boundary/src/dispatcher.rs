//! Boundary dispatcher: the actor task that owns the key service.
//!
//! Callers never touch [`KeyService`] directly. They hold a cloneable
//! [`KeyServiceHandle`] and send requests over a bounded queue; the task
//! executes them one at a time in arrival order and answers each on its own
//! oneshot channel. When the task stops, KEK and CEK state is zeroized.

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::messages::{import_material, Reply, Request};
use keywarden_common::{Error, Result};
use keywarden_crypto::codec;
use keywarden_keyring::{Envelope, KekSource, KeyService};

enum Command {
    Execute(Request, oneshot::Sender<Result<Value>>),
    Shutdown,
}

/// Cloneable handle to a running key service task.
#[derive(Clone)]
pub struct KeyServiceHandle {
    request_tx: mpsc::Sender<Command>,
}

impl KeyServiceHandle {
    /// Move `service` into a new task and return a handle to it.
    ///
    /// The join handle yields the service back, already zeroized, once the
    /// task stops.
    pub fn spawn(service: KeyService) -> (Self, JoinHandle<KeyService>) {
        let capacity = service.config().channel_capacity.max(1);
        let (request_tx, request_rx) = mpsc::channel(capacity);
        let task = tokio::spawn(run(service, request_rx));
        (Self { request_tx }, task)
    }

    /// Execute one request.
    ///
    /// # Errors
    /// - `ServiceStopped` if the task is no longer running
    /// - Whatever the operation itself returns
    pub async fn call(&self, request: Request) -> Result<Value> {
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .send(Command::Execute(request, response_tx))
            .await
            .map_err(|_| Error::ServiceStopped)?;

        response_rx.await.map_err(|_| Error::ServiceStopped)?
    }

    /// Execute one request and wrap the outcome in a reply.
    pub async fn dispatch(&self, request_id: Option<Value>, request: Request) -> Reply {
        Reply::from_result(request_id, self.call(request).await)
    }

    /// Parse one JSON request line and execute it.
    ///
    /// Input that is not JSON, names an unknown `op`, or lacks required
    /// params yields an `UnknownOperation` reply. Malformed KEK sources and
    /// envelopes are reported by the operation itself.
    pub async fn dispatch_json(&self, line: &str) -> Reply {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                let err = Error::UnknownOperation(format!("Request is not valid JSON: {}", e));
                return Reply::failure(None, &err);
            }
        };

        let request_id = value.get("requestId").filter(|id| !id.is_null()).cloned();

        match serde_json::from_value::<Request>(value) {
            Ok(request) => self.dispatch(request_id, request).await,
            Err(e) => {
                debug!("Rejected request: {}", e);
                Reply::failure(request_id, &Error::UnknownOperation(e.to_string()))
            }
        }
    }

    /// Ask the task to stop after the requests already queued.
    pub async fn shutdown(&self) {
        let _ = self.request_tx.send(Command::Shutdown).await;
    }
}

async fn run(mut service: KeyService, mut request_rx: mpsc::Receiver<Command>) -> KeyService {
    info!("Key service started");

    while let Some(command) = request_rx.recv().await {
        match command {
            Command::Execute(request, response_tx) => {
                let op = request.name();
                debug!(op, "Processing request");
                let result = execute(&mut service, request).await;
                if let Err(e) = &result {
                    warn!(op, kind = ?e.kind(), "Request failed");
                }
                if response_tx.send(result).is_err() {
                    debug!(op, "Caller went away before the reply");
                }
            }
            Command::Shutdown => {
                info!("Received shutdown request");
                break;
            }
        }
    }

    service.zeroize();
    info!("Key service stopped");
    service
}

async fn execute(service: &mut KeyService, request: Request) -> Result<Value> {
    match request {
        Request::HasKek => Ok(json!({ "provisioned": service.has_kek() })),
        Request::GetDevicePublicKey => {
            let public = service.device_public_key().await?;
            Ok(json!({ "publicKey": codec::encode(&public) }))
        }
        Request::ImportDeviceKeys {
            private_key_jwk,
            public_key_raw_base64,
        } => {
            let material = import_material(private_key_jwk, public_key_raw_base64);
            service.import_device_keys(&material).await?;
            Ok(json!({ "ok": true }))
        }
        Request::ExportDeviceKeys => {
            let material = service.export_device_keys().await?;
            let jwk: Value = serde_json::from_str(&material.private_key_jwk)?;
            Ok(json!({
                "privateKeyJwk": jwk,
                "publicKeyRawBase64": material.public_key_raw_base64,
            }))
        }
        Request::ProvisionKek { source } => {
            let source = KekSource::from_value(Value::Object(source))?;
            service.provision_kek(&source).await?;
            Ok(json!({ "ok": true }))
        }
        Request::RewrapCek {
            wrapped_cek,
            new_kek_delivery,
        } => {
            let next = KekSource::from_value(new_kek_delivery)?;
            let wrapped = service.rewrap_cek(&wrapped_cek, &next).await?;
            Ok(json!({ "wrappedCek": wrapped }))
        }
        Request::EnsureCek { store, wrapped_cek } => {
            match service.ensure_cek(&store, wrapped_cek.as_ref())? {
                Some(wrapped) => Ok(json!({ "wrappedCek": wrapped })),
                None => Ok(json!({})),
            }
        }
        Request::WrapCek { store } => {
            let wrapped = service.wrap_cek(&store)?;
            Ok(json!({ "wrappedCek": wrapped }))
        }
        Request::RewrapStore {
            store,
            new_kek_delivery,
        } => {
            let next = KekSource::from_value(new_kek_delivery)?;
            let wrapped = service.rewrap_store(&store, &next).await?;
            Ok(json!({ "wrappedCek": wrapped }))
        }
        Request::Encrypt {
            store,
            id,
            record,
            overrides,
        } => {
            let envelope = service.encrypt(&store, id, &record, overrides.as_ref())?;
            Ok(serde_json::to_value(envelope)?)
        }
        Request::Decrypt { store, envelope } => {
            let envelope = Envelope::from_value(envelope)?;
            service.decrypt(&store, &envelope)
        }
        Request::Zeroize => {
            service.zeroize();
            Ok(json!({ "ok": true }))
        }
        Request::ResetDeviceIdentity => {
            service.reset_device_identity().await?;
            Ok(json!({ "ok": true }))
        }
        Request::Status => Ok(serde_json::to_value(service.status().await?)?),
    }
}
