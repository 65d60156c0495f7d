//! # Shared Object Replica
//!
//! The optimistic client half of shared object replication.
//!
//! This crate provides:
//! - A local proxy per object with a confirmed `value` and a speculative
//!   `value_temp`
//! - An outgoing buffer flushed as one batch per [`ReplicaClient::update`]
//! - Tracking of sent actions until the server echoes them back
//! - Observers notified on every confirmed change
//!
//! ## Key Invariants
//!
//! - `value` only changes on server snapshots and slices
//! - `value_temp` is `value` plus every unacknowledged local command, in
//!   submission order
//! - A failed flush loses nothing: the batch returns to the buffer
//! - Action counters are unique per replica across all objects

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod object;
mod observer;
mod replica;
mod transport;

pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use object::ClientObject;
pub use observer::{Observer, ObserverId};
pub use replica::ReplicaClient;
pub use transport::ClientTransport;
