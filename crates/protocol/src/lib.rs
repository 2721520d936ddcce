//! Wire types for the extension automation protocol.
//!
//! This crate contains the serde-serializable types exchanged with the
//! browser-extension automation host over JSON-RPC. These types represent
//! the "protocol layer" - the shapes of data as they appear on the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization/deserialization
//! - **1:1 with protocol**: Match the host's protocol schema
//! - **Stable**: Changes only when the wire protocol changes
//!
//! Higher-level ergonomic APIs are built on top of these types in `bext`.

pub mod options;
pub mod types;

pub use options::*;
pub use types::*;
