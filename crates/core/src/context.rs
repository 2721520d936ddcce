// BrowsingContext - the isolated browsing state owned by a session.
//
// Each session owns exactly one context for its whole lifetime. The
// context is where the page list lives, and its close notification is
// what ends the session: the host closing the context (explicitly or
// because the window went away) reaches the session through here.

use crate::page::{Page, lookup_page_ref};
use bext_runtime::channel::{Channel, RemoteRef};
use bext_runtime::channel_owner::{ChannelOwner, ChannelOwnerImpl, ParentOrConnection};
use bext_runtime::connection::ConnectionLike;
use bext_runtime::Result;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// Isolated browsing state (cookies, storage, windows) behind a session.
#[derive(Clone)]
pub struct BrowsingContext {
    base: ChannelOwnerImpl,
}

impl BrowsingContext {
    /// Creates a new BrowsingContext from protocol initialization.
    pub(crate) fn new(
        parent: Arc<dyn ChannelOwner>,
        type_name: String,
        guid: Arc<str>,
        initializer: Value,
    ) -> Result<Self> {
        let base = ChannelOwnerImpl::new(
            ParentOrConnection::Parent(parent),
            type_name,
            guid,
            initializer,
        );
        Ok(Self { base })
    }

    fn channel(&self) -> &Channel {
        self.base.channel()
    }

    /// Returns the GUID identifying this context on the channel.
    pub fn guid(&self) -> &str {
        self.base.guid()
    }

    /// Returns the pages currently attached in this context.
    ///
    /// This is a remote call: it fails when the underlying channel is
    /// unusable, which is exactly the signal the controller's liveness
    /// probe relies on.
    pub async fn pages(&self) -> Result<Vec<Page>> {
        #[derive(Deserialize)]
        struct PagesResponse {
            pages: Vec<RemoteRef>,
        }

        let response: PagesResponse = self.channel().send("pages", serde_json::json!({})).await?;

        let connection = self.connection();
        response
            .pages
            .iter()
            .map(|page_ref| lookup_page_ref(&connection, &page_ref.guid))
            .collect()
    }
}

impl bext_runtime::channel_owner::private::Sealed for BrowsingContext {}

impl ChannelOwner for BrowsingContext {
    fn guid(&self) -> &str {
        self.base.guid()
    }

    fn type_name(&self) -> &str {
        self.base.type_name()
    }

    fn parent(&self) -> Option<Arc<dyn ChannelOwner>> {
        self.base.parent()
    }

    fn connection(&self) -> Arc<dyn ConnectionLike> {
        self.base.connection()
    }

    fn initializer(&self) -> &Value {
        self.base.initializer()
    }

    fn channel(&self) -> &Channel {
        self.base.channel()
    }

    fn dispose(&self) {
        self.base.dispose()
    }

    fn add_child(&self, guid: Arc<str>, child: Arc<dyn ChannelOwner>) {
        self.base.add_child(guid, child)
    }

    fn remove_child(&self, guid: &str) {
        self.base.remove_child(guid)
    }

    fn on_event(&self, method: &str, params: Value) {
        match method {
            "close" => {
                // Session closure is tied to context closure: tell the
                // owning session rather than handling it here.
                if let Some(session) = self
                    .parent()
                    .and_then(|p| p.downcast_ref::<crate::Session>().cloned())
                {
                    session.handle_context_close();
                } else {
                    tracing::debug!(guid = self.guid(), "context closed without owning session");
                }
            }
            _ => self.base.on_event(method, params),
        }
    }
}

impl std::fmt::Debug for BrowsingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowsingContext")
            .field("guid", &self.guid())
            .finish()
    }
}
