// Recorder - mirror of the host's recorder UI state.
//
// The host is authoritative for recorder state. Commands (`show`, `hide`,
// `set_mode`) only send requests; local state changes when the host echoes
// the corresponding event back, so an acknowledged command and the UI
// actually changing remain two distinct observable steps.

use crate::events::{EventBus, EventStream};
use crate::page::Page;
use bext_protocol::{RecorderMode, RecorderShowOptions, ScriptTest};
use bext_runtime::channel::Channel;
use bext_runtime::channel_owner::{ChannelOwner, ChannelOwnerImpl, ParentOrConnection};
use bext_runtime::connection::ConnectionLike;
use bext_runtime::Result;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Events the recorder emits when the host changes its UI state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderEvent {
    /// The recorder UI was hidden.
    Hidden,
    /// The recorder UI was shown.
    Shown,
    /// The recorder switched mode.
    ModeChanged(RecorderMode),
}

/// Client-side mirror of the host's recorder UI.
///
/// Starts hidden with mode [`RecorderMode::None`]; state is mutated only
/// by inbound `hide`/`show`/`modeChanged` events.
#[derive(Clone)]
pub struct Recorder {
    base: ChannelOwnerImpl,
    hidden: Arc<AtomicBool>,
    mode: Arc<Mutex<RecorderMode>>,
    bus: Arc<EventBus<RecorderEvent>>,
}

impl Recorder {
    /// Creates a new Recorder from protocol initialization.
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

        Ok(Self {
            base,
            hidden: Arc::new(AtomicBool::new(true)),
            mode: Arc::new(Mutex::new(RecorderMode::None)),
            bus: Arc::new(EventBus::default()),
        })
    }

    fn channel(&self) -> &Channel {
        self.base.channel()
    }

    /// Returns the GUID identifying this recorder on the channel.
    pub fn guid(&self) -> &str {
        self.base.guid()
    }

    /// Returns true while the recorder UI is hidden.
    ///
    /// Reflects only inbound events: calling [`show`](Self::show) does not
    /// change this until the host's `show` event arrives.
    pub fn is_hidden(&self) -> bool {
        self.hidden.load(Ordering::SeqCst)
    }

    /// Returns the current recorder mode.
    pub fn mode(&self) -> RecorderMode {
        *self.mode.lock()
    }

    /// Asks the host to show the recorder UI.
    pub async fn show(&self, options: Option<RecorderShowOptions>) -> Result<()> {
        let params = match options {
            Some(options) => serde_json::to_value(options)?,
            None => serde_json::json!({}),
        };
        self.channel().send_no_result("show", params).await
    }

    /// Asks the host to hide the recorder UI.
    pub async fn hide(&self) -> Result<()> {
        self.channel()
            .send_no_result("hide", serde_json::json!({}))
            .await
    }

    /// Asks the host to switch the recorder mode.
    pub async fn set_mode(&self, mode: RecorderMode) -> Result<()> {
        self.channel()
            .send_no_result("setMode", serde_json::json!({ "mode": mode }))
            .await
    }

    /// Analyzes a script and returns the tests it contains.
    ///
    /// Stateless pass-through; has no effect on recorder state.
    pub async fn list(&self, code: &str) -> Result<Vec<ScriptTest>> {
        #[derive(Deserialize)]
        struct ListResponse {
            tests: Vec<ScriptTest>,
        }

        let response: ListResponse = self
            .channel()
            .send("list", serde_json::json!({ "code": code }))
            .await?;
        Ok(response.tests)
    }

    /// Loads a script into the recorder.
    pub async fn load(&self, code: &str) -> Result<()> {
        self.channel()
            .send_no_result("load", serde_json::json!({ "code": code }))
            .await
    }

    /// Runs a script, optionally scoped to a specific page.
    pub async fn run(&self, code: &str, page: Option<&Page>) -> Result<()> {
        let params = match page {
            Some(page) => serde_json::json!({ "code": code, "page": { "guid": page.guid() } }),
            None => serde_json::json!({ "code": code }),
        };
        self.channel().send_no_result("run", params).await
    }

    /// Subscribes to recorder UI state changes.
    pub fn events(&self) -> EventStream<RecorderEvent> {
        EventStream::new(self.bus.subscribe())
    }
}

impl bext_runtime::channel_owner::private::Sealed for Recorder {}

impl ChannelOwner for Recorder {
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
            "hide" => {
                self.hidden.store(true, Ordering::SeqCst);
                self.bus.emit(RecorderEvent::Hidden);
            }
            "show" => {
                self.hidden.store(false, Ordering::SeqCst);
                self.bus.emit(RecorderEvent::Shown);
            }
            "modeChanged" => match params
                .get("mode")
                .map(|v| serde_json::from_value::<RecorderMode>(v.clone()))
            {
                Some(Ok(mode)) => {
                    *self.mode.lock() = mode;
                    self.bus.emit(RecorderEvent::ModeChanged(mode));
                }
                // An unknown mode must not poison the state machine.
                _ => tracing::debug!("unrecognized recorder mode: {:?}", params),
            },
            _ => self.base.on_event(method, params),
        }
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("guid", &self.guid())
            .field("hidden", &self.is_hidden())
            .field("mode", &self.mode())
            .finish()
    }
}
