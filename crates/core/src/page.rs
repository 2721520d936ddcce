// Page - thin handle for an attached tab.
//
// The automation host owns the real page; this handle carries its channel
// identity and the last URL the host reported. Everything a caller can do
// to page content happens host-side through richer tooling; the session
// layer only needs a stable handle to attach, scope, and detach tabs.

use bext_runtime::channel::Channel;
use bext_runtime::channel_owner::{ChannelOwner, ChannelOwnerImpl, ParentOrConnection};
use bext_runtime::connection::ConnectionLike;
use bext_runtime::{Error, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// How long to wait for a page object referenced by a response to appear
/// in the registry.
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a page (tab) attached to an automation session.
#[derive(Clone)]
pub struct Page {
    base: ChannelOwnerImpl,
    url: Arc<RwLock<String>>,
}

impl Page {
    /// Creates a new Page from protocol initialization.
    ///
    /// Called by the object factory when the host sends a `__create__`
    /// message for a page object.
    pub(crate) fn new(
        parent: Arc<dyn ChannelOwner>,
        type_name: String,
        guid: Arc<str>,
        initializer: Value,
    ) -> Result<Self> {
        let url = initializer
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or("about:blank")
            .to_string();

        let base = ChannelOwnerImpl::new(
            ParentOrConnection::Parent(parent),
            type_name,
            guid,
            initializer,
        );

        Ok(Self {
            base,
            url: Arc::new(RwLock::new(url)),
        })
    }

    fn channel(&self) -> &Channel {
        self.base.channel()
    }

    /// Returns the GUID identifying this page on the channel.
    pub fn guid(&self) -> &str {
        self.base.guid()
    }

    /// Returns the last committed URL the host reported for this page.
    pub fn url(&self) -> String {
        self.url.read().clone()
    }

    /// Closes the page (closes the tab host-side).
    pub async fn close(&self) -> Result<()> {
        self.channel()
            .send_no_result("close", serde_json::json!({}))
            .await
    }
}

impl bext_runtime::channel_owner::private::Sealed for Page {}

impl ChannelOwner for Page {
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
            "navigated" => {
                if let Some(url) = params.get("url").and_then(|v| v.as_str()) {
                    *self.url.write() = url.to_string();
                }
            }
            _ => self.base.on_event(method, params),
        }
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("guid", &self.guid())
            .field("url", &self.url())
            .finish()
    }
}

/// Resolves a page reference from a response into a handle.
///
/// The host announces the page with `__create__` before responding, but
/// that announcement may still be in flight on the dispatch task, so this
/// waits briefly for the registry entry.
pub(crate) async fn resolve_page_ref(
    connection: &Arc<dyn ConnectionLike>,
    guid: &str,
) -> Result<Page> {
    let object = connection.wait_for_object(guid, RESOLVE_TIMEOUT).await?;
    downcast_page(object)
}

/// Resolves a page reference carried by an event.
///
/// Events are dispatched after the object they reference was created, so
/// a registry miss here is a protocol fault, not a race.
pub(crate) fn lookup_page_ref(connection: &Arc<dyn ConnectionLike>, guid: &str) -> Result<Page> {
    downcast_page(connection.get_object(guid)?)
}

fn downcast_page(object: Arc<dyn ChannelOwner>) -> Result<Page> {
    object
        .downcast_ref::<Page>()
        .cloned()
        .ok_or_else(|| Error::ObjectNotFound {
            guid: object.guid().to_string(),
            expected: Some("Page"),
        })
}
