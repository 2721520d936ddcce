//! bext: Rust client for a browser-extension automation host.
//!
//! The host lives in a browser extension and owns the tabs; this crate
//! owns the client-side state: starting and sharing automation sessions,
//! recovering when a cached session has silently died, attaching and
//! detaching tabs as page handles, and mirroring the recorder UI state
//! from host events.
//!
//! # Sessions
//!
//! ```ignore
//! use bext::StartOptions;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // `outbound`/`inbound` bridge to whatever transport reaches the host.
//!     let controller = bext::connect(outbound, inbound).await?;
//!
//!     // Starts are idempotent per mode: concurrent and repeated calls
//!     // share one session, and a dead cached session is replaced
//!     // transparently.
//!     let session = controller.start(StartOptions::new()).await?;
//!     let private = controller
//!         .start(StartOptions::new().incognito(true))
//!         .await?;
//!
//!     let page = session.attach(42).await?;
//!     session.detach(&page).await?;
//!
//!     session.close().await?;
//!     private.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Events
//!
//! ```ignore
//! let mut events = session.events();
//! while let Some(event) = events.recv().await {
//!     match event {
//!         bext::SessionEvent::Attached { tab_id, page } => {
//!             println!("tab {tab_id} attached at {}", page.url());
//!         }
//!         bext::SessionEvent::Detached { tab_id } => println!("tab {tab_id} detached"),
//!         bext::SessionEvent::Closed => break,
//!     }
//! }
//! ```

mod init;
mod object_factory;

pub mod context;
pub mod controller;
pub mod events;
pub mod page;
pub mod recorder;
pub mod session;

pub use context::BrowsingContext;
pub use controller::SessionController;
pub use events::{EventStream, EventWaiter};
pub use init::connect;
pub use page::Page;
pub use recorder::{Recorder, RecorderEvent};
pub use session::{DetachTarget, Session, SessionEvent};

// Re-export wire types for convenience
pub use bext_protocol;
pub use bext_protocol::{
    AttachAllOptions, NewPageOptions, RecorderMode, RecorderShowOptions, ScriptLocation,
    ScriptTest, SessionMode, StartOptions, TabId, UrlPatterns,
};

// Re-export bext-runtime for internal use
pub use bext_runtime;

// Re-export Error and Result from bext-runtime
pub use bext_runtime::{Error, Result};
