//! # Shared Object Store
//!
//! The authoritative half of shared object replication.
//!
//! This crate provides:
//! - Per-object value, version counter and action log
//! - Listener tracking (last version each connection has received)
//! - Fan-out of snapshots or action slices to lagging listeners
//! - Log garbage collection bounded by the slowest listener
//!
//! # Architecture
//!
//! Every object sits behind its own lock, so work on different objects
//! never contends. Fan-out snapshots what each listener needs under the
//! object lock, releases it, and only then awaits the transport.
//!
//! # Delivery
//!
//! Delivery is best effort. A listener's `last_version` is advanced before
//! the send and rolled back if it fails; the next [`ObjectServer::update`]
//! pass retries naturally.
//!
//! ```rust,ignore
//! let server = ObjectServer::new(ServerConfig::default(), ArrayApplicator::new(), transport);
//!
//! // raw batch from a connection
//! server.receive(&raw, &connection).await?;
//!
//! // on the host's own cadence
//! server.update().await;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod object;
mod store;
mod transport;

pub use config::{ServerConfig, DEFAULT_BUFFER_MIN};
pub use error::{ServerError, ServerResult};
pub use object::{Listener, SharedObject};
pub use store::{FanOutReport, ObjectHandle, ObjectServer, ReceiveReport, ServerStats};
pub use transport::ServerTransport;
