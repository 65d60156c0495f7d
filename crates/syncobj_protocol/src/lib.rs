//! # Shared Object Sync Protocol
//!
//! Protocol types and JSON codec for replicating versioned shared objects.
//!
//! This crate provides:
//! - `Action` for stamped and pending mutations
//! - Protocol messages (`c:init`, `c:update`, `c:reset`, `s:init`, `s:update`)
//! - JSON encoding/decoding of message batches
//! - The `Applicator` capability implemented by every data shape
//! - Log truncation used by server-side garbage collection
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod applicator;
mod codec;
mod error;
mod messages;
mod retention;

pub use action::{Action, ActionKey};
pub use applicator::Applicator;
pub use codec::{
    decode_client_batch, decode_server_message, encode_client_batch, encode_server_message,
    DecodedBatch,
};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ClientMessage, InitRequest, ObjectVersion, ResetRequest, ServerMessage, SnapshotMessage,
    SliceMessage, UpdateRequest,
};
pub use retention::truncate;
