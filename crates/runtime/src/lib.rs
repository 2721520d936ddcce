//! Runtime infrastructure for the extension automation client.
//!
//! This crate provides the low-level plumbing for talking to the
//! browser-extension automation host:
//!
//! - **Connection**: JSON-RPC request/response correlation and event dispatch
//! - **Object registry**: protocol objects addressed by GUID
//! - **Channel**: per-object RPC proxy
//! - **ChannelOwner**: base trait shared by all protocol objects
//!
//! The wire transport is deliberately absent: a [`Connection`] is fed by a
//! pair of in-memory message channels, and the embedder bridges those to
//! whatever actually reaches the host (an extension message port, a
//! WebSocket, a pipe). The client-side state this crate manages is correct
//! regardless of what is on the other end.
//!
//! # Decoupling via ObjectFactory
//!
//! The `Connection` uses an [`ObjectFactory`] trait to create protocol
//! objects without depending on their concrete types, keeping this crate
//! independent of the API crate above it.

pub mod channel;
pub mod channel_owner;
pub mod connection;
pub mod error;
pub mod object_store;

// Re-export key types at crate root
pub use channel::{Channel, RemoteRef};
pub use channel_owner::{ChannelOwner, ChannelOwnerImpl, ParentOrConnection};
pub use connection::{
    Connection, ConnectionLike, Event, Message, Metadata, ObjectFactory, Request, Response,
};
pub use error::{Error, Result};
pub use object_store::ObjectStore;
