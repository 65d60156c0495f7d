//! # Shared Object Applicators
//!
//! The built-in data shapes a shared object can carry. Each one is a
//! strategy implementing [`syncobj_protocol::Applicator`], picked when the
//! store and the replicas are constructed:
//!
//! - [`ArrayApplicator`]: ordered lists edited with add/remove/update commands
//! - [`TextApplicator`]: plain text edited with splice commands

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod array;
mod text;

pub use array::{ArrayApplicator, ArrayCommand};
pub use text::{normalize, TextApplicator, TextCommand};
