//! Request boundary for the Keywarden key service.
//!
//! The service runs as a single tokio task and is reachable only through
//! [`KeyServiceHandle`]. Requests and replies have a JSON form so that any
//! transport carrying lines of text can host the service.

pub mod dispatcher;
pub mod messages;

pub use dispatcher::KeyServiceHandle;
pub use messages::{Outcome, Reply, Request};
