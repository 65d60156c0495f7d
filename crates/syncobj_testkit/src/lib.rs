//! # Shared Object Testkit
//!
//! Test utilities for shared object replication.
//!
//! This crate provides:
//! - An in-memory [`Network`] with offline, fail-next and hold/release fault
//!   injection
//! - Loopback transports connecting an `ObjectServer` and `ReplicaClient`s
//! - A [`Harness`] to connect, disconnect and settle clients
//! - Property-based generators for applicator commands
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use syncobj_testkit::prelude::*;
//!
//! let harness = Harness::new(ArrayApplicator::<String>::new());
//! let alice = harness.connect("alice");
//! alice.init("doc", true).await?;
//! alice.command("doc", ArrayCommand::push("row".to_string()));
//! harness.settle(&[&alice]).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod generators;
pub mod harness;
pub mod links;
pub mod logging;
pub mod network;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::generators::*;
    pub use crate::harness::*;
    pub use crate::links::*;
    pub use crate::logging::*;
    pub use crate::network::*;
    pub use syncobj_applicators::{ArrayApplicator, ArrayCommand, TextApplicator, TextCommand};
}

pub use generators::*;
pub use harness::*;
pub use links::*;
pub use logging::*;
pub use network::*;
