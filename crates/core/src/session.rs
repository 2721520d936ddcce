// Copyright 2024 Paul Adamson
// Licensed under the Apache License, Version 2.0
//
// Session - one running automation session.
//
// A session owns exactly one browsing context and one recorder for its
// whole lifetime. Tab attach/detach are request/response operations
// against the host, which stays the source of truth for which tabs are
// attached; the `Attached`/`Detached` events here are advisory
// notifications (the host also attaches and detaches tabs on its own,
// e.g. when the user closes one).

use crate::context::BrowsingContext;
use crate::events::{EventBus, EventStream, EventWaiter};
use crate::page::{Page, resolve_page_ref};
use crate::recorder::Recorder;
use bext_protocol::{AttachAllOptions, AttachParams, NewPageOptions, TabId};
use bext_runtime::channel::{Channel, RemoteRef};
use bext_runtime::channel_owner::{ChannelOwner, ChannelOwnerImpl, ParentOrConnection};
use bext_runtime::connection::ConnectionLike;
use bext_runtime::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Default timeout for [`Session::closed`] when consumed via
/// [`EventWaiter::wait`].
const CLOSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Events a session re-emits to its subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A tab was attached and is now addressable as a page.
    Attached {
        /// Browser tab id.
        tab_id: TabId,
        /// Handle for the attached page.
        page: Page,
    },
    /// A tab was detached.
    Detached {
        /// Browser tab id.
        tab_id: TabId,
    },
    /// The session's browsing context closed; the session is over.
    Closed,
}

/// Identifies the tab a detach request targets.
///
/// The wire accepts either a tab id or a page reference; callers hold
/// whichever is more convenient, and the conversion to the single wire
/// shape happens at dispatch.
#[derive(Debug, Clone)]
pub enum DetachTarget {
    /// Detach by browser tab id.
    Tab(TabId),
    /// Detach the tab behind a page handle.
    Page(Page),
}

impl From<TabId> for DetachTarget {
    fn from(tab_id: TabId) -> Self {
        DetachTarget::Tab(tab_id)
    }
}

impl From<Page> for DetachTarget {
    fn from(page: Page) -> Self {
        DetachTarget::Page(page)
    }
}

impl From<&Page> for DetachTarget {
    fn from(page: &Page) -> Self {
        DetachTarget::Page(page.clone())
    }
}

/// One running automation session.
///
/// Obtained from [`SessionController::start`]; multiple logical callers
/// per mode share one session instance. A session is identified by its
/// channel object, not by the mode it was started under.
///
/// [`SessionController::start`]: crate::SessionController::start
#[derive(Clone)]
pub struct Session {
    base: ChannelOwnerImpl,
    context_guid: Arc<str>,
    recorder_guid: Arc<str>,
    bus: Arc<EventBus<SessionEvent>>,
}

impl Session {
    /// Creates a new Session from protocol initialization.
    ///
    /// The initializer references the context and recorder the host
    /// created alongside the session:
    /// `{"context": {"guid": ...}, "recorder": {"guid": ...}}`.
    pub(crate) fn new(
        parent: Arc<dyn ChannelOwner>,
        type_name: String,
        guid: Arc<str>,
        initializer: Value,
    ) -> Result<Self> {
        let context_guid: Arc<str> =
            Arc::from(initializer["context"]["guid"].as_str().ok_or_else(|| {
                Error::ProtocolError("Session initializer missing 'context.guid'".to_string())
            })?);

        let recorder_guid: Arc<str> =
            Arc::from(initializer["recorder"]["guid"].as_str().ok_or_else(|| {
                Error::ProtocolError("Session initializer missing 'recorder.guid'".to_string())
            })?);

        let base = ChannelOwnerImpl::new(
            ParentOrConnection::Parent(parent),
            type_name,
            guid,
            initializer,
        );

        Ok(Self {
            base,
            context_guid,
            recorder_guid,
            bus: Arc::new(EventBus::default()),
        })
    }

    fn channel(&self) -> &Channel {
        self.base.channel()
    }

    /// Returns the GUID identifying this session on the channel.
    pub fn guid(&self) -> &str {
        self.base.guid()
    }

    /// Returns the browsing context this session owns.
    pub fn context(&self) -> Result<BrowsingContext> {
        let object = self.connection().get_object(&self.context_guid)?;
        object
            .downcast_ref::<BrowsingContext>()
            .cloned()
            .ok_or_else(|| Error::ObjectNotFound {
                guid: self.context_guid.to_string(),
                expected: Some("BrowsingContext"),
            })
    }

    /// Returns the recorder this session owns.
    pub fn recorder(&self) -> Result<Recorder> {
        let object = self.connection().get_object(&self.recorder_guid)?;
        object
            .downcast_ref::<Recorder>()
            .cloned()
            .ok_or_else(|| Error::ObjectNotFound {
                guid: self.recorder_guid.to_string(),
                expected: Some("Recorder"),
            })
    }

    /// Returns the pages currently attached in this session.
    ///
    /// Delegates to the owned context; fails when the underlying channel
    /// is unusable. The controller uses this as its liveness probe.
    pub async fn pages(&self) -> Result<Vec<Page>> {
        self.context()?.pages().await
    }

    /// Attaches the given tab and returns its page handle.
    ///
    /// Whether a tab can be attached (it must exist, must not already be
    /// attached, ...) is decided by the host.
    pub async fn attach(&self, tab_id: TabId) -> Result<Page> {
        #[derive(Deserialize)]
        struct AttachResponse {
            page: RemoteRef,
        }

        let response: AttachResponse = self
            .channel()
            .send("attach", AttachParams { tab_id })
            .await?;

        resolve_page_ref(&self.connection(), &response.page.guid).await
    }

    /// Attaches every tab matching the filter and returns their handles.
    pub async fn attach_all(&self, options: Option<AttachAllOptions>) -> Result<Vec<Page>> {
        #[derive(Deserialize)]
        struct AttachAllResponse {
            pages: Vec<RemoteRef>,
        }

        let params = match options {
            Some(options) => serde_json::to_value(options)?,
            None => serde_json::json!({}),
        };

        let response: AttachAllResponse = self.channel().send("attachAll", params).await?;

        let connection = self.connection();
        let mut pages = Vec::with_capacity(response.pages.len());
        for page_ref in &response.pages {
            pages.push(resolve_page_ref(&connection, &page_ref.guid).await?);
        }
        Ok(pages)
    }

    /// Detaches a tab, identified by id or by page handle.
    pub async fn detach(&self, target: impl Into<DetachTarget>) -> Result<()> {
        let params = match target.into() {
            DetachTarget::Tab(tab_id) => serde_json::json!({ "tabId": tab_id }),
            DetachTarget::Page(page) => {
                serde_json::json!({ "page": { "guid": page.guid() } })
            }
        };

        self.channel().send_no_result("detach", params).await
    }

    /// Detaches every attached tab.
    pub async fn detach_all(&self) -> Result<()> {
        self.channel()
            .send_no_result("detachAll", serde_json::json!({}))
            .await
    }

    /// Opens a new page (tab) in this session.
    pub async fn new_page(&self, options: Option<NewPageOptions>) -> Result<Page> {
        #[derive(Deserialize)]
        struct NewPageResponse {
            page: RemoteRef,
        }

        let params = match options {
            Some(options) => serde_json::to_value(options)?,
            None => serde_json::json!({}),
        };

        let response: NewPageResponse = self.channel().send("newPage", params).await?;

        resolve_page_ref(&self.connection(), &response.page.guid).await
    }

    /// Requests remote teardown of the session.
    ///
    /// [`SessionEvent::Closed`] fires when the owned context reports
    /// close, not when this call returns.
    pub async fn close(&self) -> Result<()> {
        self.channel()
            .send_no_result("close", serde_json::json!({}))
            .await
    }

    /// Subscribes to this session's events.
    pub fn events(&self) -> EventStream<SessionEvent> {
        EventStream::new(self.bus.subscribe())
    }

    /// One-shot waiter that completes when the session closes.
    ///
    /// Await it directly for no timeout, or use [`EventWaiter::wait`] for
    /// a bounded wait.
    pub fn closed(&self) -> EventWaiter<SessionEvent> {
        let rx = self
            .bus
            .register_waiter(|event| matches!(event, SessionEvent::Closed));
        EventWaiter::new(rx, CLOSE_TIMEOUT)
    }

    /// Called by the owned context when the host reports it closed.
    pub(crate) fn handle_context_close(&self) {
        tracing::debug!(guid = self.guid(), "session context closed");
        self.bus.emit(SessionEvent::Closed);
    }
}

impl bext_runtime::channel_owner::private::Sealed for Session {}

impl ChannelOwner for Session {
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
            "attached" => {
                // Event shape: {tabId, page: {guid}}
                let tab_id = params.get("tabId").and_then(|v| v.as_u64()).map(|v| v as TabId);
                let page_guid = params
                    .get("page")
                    .and_then(|v| v.get("guid"))
                    .and_then(|v| v.as_str());

                match (tab_id, page_guid) {
                    (Some(tab_id), Some(page_guid)) => {
                        match crate::page::lookup_page_ref(&self.connection(), page_guid) {
                            Ok(page) => self.bus.emit(SessionEvent::Attached { tab_id, page }),
                            Err(e) => {
                                tracing::error!(error = %e, guid = page_guid, "failed to resolve attached page");
                            }
                        }
                    }
                    _ => tracing::debug!("malformed attached event: {:?}", params),
                }
            }
            "detached" => {
                if let Some(tab_id) = params.get("tabId").and_then(|v| v.as_u64()) {
                    self.bus.emit(SessionEvent::Detached {
                        tab_id: tab_id as TabId,
                    });
                } else {
                    tracing::debug!("malformed detached event: {:?}", params);
                }
            }
            _ => self.base.on_event(method, params),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("guid", &self.guid())
            .finish()
    }
}
