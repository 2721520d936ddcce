//! JSON-RPC connection layer for the extension automation protocol.
//!
//! This module implements the request/response correlation layer on top of
//! an embedder-provided message channel pair. It handles:
//! - Generating unique request IDs
//! - Correlating responses with pending requests
//! - Distinguishing events from responses
//! - Dispatching events to protocol objects
//!
//! # Message Flow
//!
//! 1. Client calls `send_message()` with GUID, method, and params
//! 2. Connection generates unique ID and creates oneshot channel
//! 3. Request is serialized and pushed to the outbound channel
//! 4. Client awaits on the oneshot receiver
//! 5. Dispatch loop receives a message from the inbound channel
//! 6. Response is correlated by ID and delivered via oneshot channel
//!
//! The host announces new objects with `__create__` events before any
//! response that references them, so a response GUID can be resolved from
//! the registry as soon as the response arrives.

use crate::channel_owner::{ChannelOwner, ParentOrConnection};
use crate::error::{Error, Result};
use crate::object_store::ObjectStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Trait defining the interface that ChannelOwner needs from a Connection.
///
/// Protocol objects hold `Arc<dyn ConnectionLike>` so they never depend on
/// the concrete Connection type; tests substitute their own endpoints.
pub trait ConnectionLike: Send + Sync {
    /// Send a message to the automation host and await the response.
    fn send_message(
        &self,
        guid: &str,
        method: &str,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>>;

    /// Register an object in the connection's registry.
    fn register_object(&self, guid: Arc<str>, object: Arc<dyn ChannelOwner>);

    /// Unregister an object from the connection's registry.
    ///
    /// Synchronous so it can be called from dispose() without a runtime.
    fn unregister_object(&self, guid: &str);

    /// Look up an object by GUID.
    fn get_object(&self, guid: &str) -> Result<Arc<dyn ChannelOwner>>;

    /// Wait for an object to be registered, with timeout.
    ///
    /// Useful when a response references a GUID whose `__create__` is
    /// processed on another task and may not have landed yet.
    fn wait_for_object(
        &self,
        guid: &str,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn ChannelOwner>>> + Send + '_>>;
}

/// Factory trait for creating protocol objects.
///
/// Decouples the Connection from concrete protocol object types: the
/// factory lives in the API crate and is installed before the dispatch
/// loop runs.
pub trait ObjectFactory: Send + Sync {
    /// Create a protocol object from a `__create__` message.
    fn create_object(
        &self,
        parent: ParentOrConnection,
        type_name: String,
        guid: Arc<str>,
        initializer: Value,
    ) -> Result<Arc<dyn ChannelOwner>>;
}

/// Metadata attached to every protocol request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Unix timestamp in milliseconds
    #[serde(rename = "wallTime")]
    pub wall_time: i64,
}

impl Metadata {
    /// Create metadata with the current timestamp.
    pub fn now() -> Self {
        Self {
            wall_time: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0),
        }
    }
}

/// Protocol request message sent to the automation host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Unique request ID for correlating responses
    pub id: u32,
    /// GUID of the target object (format: "type@hash")
    #[serde(
        serialize_with = "serialize_arc_str",
        deserialize_with = "deserialize_arc_str"
    )]
    pub guid: Arc<str>,
    /// Method name to invoke
    pub method: String,
    /// Method parameters as JSON object
    pub params: Value,
    /// Metadata with timing information
    pub metadata: Metadata,
}

/// Serde helpers for `Arc<str>` serialization
pub fn serialize_arc_str<S>(arc: &Arc<str>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(arc)
}

pub fn deserialize_arc_str<'de, D>(deserializer: D) -> std::result::Result<Arc<str>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = serde::Deserialize::deserialize(deserializer)?;
    Ok(Arc::from(s.as_str()))
}

/// Protocol response message from the automation host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Request ID this response correlates to
    pub id: u32,
    /// Success result (mutually exclusive with error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error result (mutually exclusive with result)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorWrapper>,
}

/// Wrapper for protocol error payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorWrapper {
    pub error: ErrorPayload,
}

/// Protocol error details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error message
    pub message: String,
    /// Error type name (e.g., "TimeoutError", "TargetClosedError")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Stack trace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Protocol event message from the automation host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// GUID of the object that emitted the event
    #[serde(
        serialize_with = "serialize_arc_str",
        deserialize_with = "deserialize_arc_str"
    )]
    pub guid: Arc<str>,
    /// Event method name
    pub method: String,
    /// Event parameters as JSON object
    pub params: Value,
}

/// Discriminated union of protocol messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    /// Response message (has `id` field)
    Response(Response),
    /// Event message (no `id` field)
    Event(Event),
    /// Unknown message type (forward-compatible catch-all)
    Unknown(Value),
}

/// Pending request callbacks keyed by request ID.
type CallbackMap = Arc<Mutex<HashMap<u32, oneshot::Sender<Result<Value>>>>>;

/// RAII guard ensuring callback cleanup when a request future is dropped.
///
/// Dropping an unfinished request future is how a caller abandons an
/// in-flight call; the guard removes the orphaned callback so the map
/// cannot grow without bound.
struct CancelGuard {
    id: u32,
    callbacks: CallbackMap,
    completed: bool,
}

impl CancelGuard {
    fn new(id: u32, callbacks: CallbackMap) -> Self {
        Self {
            id,
            callbacks,
            completed: false,
        }
    }

    fn complete(&mut self) {
        self.completed = true;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        if self.callbacks.lock().remove(&self.id).is_some() {
            tracing::debug!(id = self.id, "removed orphaned callback");
        }
    }
}

/// Future returned by [`Connection::send_message`] with automatic cancellation cleanup.
struct ResponseFuture {
    rx: oneshot::Receiver<Result<Value>>,
    guard: CancelGuard,
}

impl Future for ResponseFuture {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(result) => {
                self.guard.complete();
                Poll::Ready(result.map_err(|_| Error::ChannelClosed).and_then(|r| r))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// JSON-RPC connection to the automation host.
///
/// Manages request/response correlation and event dispatch over a pair of
/// in-memory message channels; the embedder bridges those to the real
/// transport.
pub struct Connection {
    /// Sequential request ID counter (atomic for thread safety)
    last_id: AtomicU32,
    /// Pending request callbacks keyed by request ID
    callbacks: CallbackMap,
    /// Outbound messages toward the host
    outbound_tx: mpsc::UnboundedSender<Value>,
    /// Inbound messages from the host (taken once by run())
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
    /// Registry of all protocol objects by GUID
    objects: ObjectStore,
    /// Factory for creating protocol objects (set before run())
    factory: Mutex<Option<Arc<dyn ObjectFactory>>>,
}

impl Connection {
    /// Create a new Connection over the given message channels.
    pub fn new(
        outbound_tx: mpsc::UnboundedSender<Value>,
        inbound_rx: mpsc::UnboundedReceiver<Value>,
    ) -> Self {
        Self {
            last_id: AtomicU32::new(0),
            callbacks: Arc::new(Mutex::new(HashMap::new())),
            outbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            objects: ObjectStore::new(),
            factory: Mutex::new(None),
        }
    }

    /// Set the object factory for creating protocol objects.
    ///
    /// Must be called before `run()` for `__create__` messages to work.
    pub fn set_factory(&self, factory: Arc<dyn ObjectFactory>) {
        *self.factory.lock() = Some(factory);
    }

    /// Sends a message to the automation host and awaits the response.
    pub async fn send_message(&self, guid: &str, method: &str, params: Value) -> Result<Value> {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst);

        tracing::debug!(id, guid, method, "sending message");

        let (tx, rx) = oneshot::channel();
        self.callbacks.lock().insert(id, tx);

        let guard = CancelGuard::new(id, Arc::clone(&self.callbacks));

        let request = Request {
            id,
            guid: Arc::from(guid),
            method: method.to_string(),
            params,
            metadata: Metadata::now(),
        };

        let request_value = serde_json::to_value(&request)?;

        if self.outbound_tx.send(request_value).is_err() {
            tracing::debug!(id, "outbound channel closed, failing request");
            return Err(Error::ChannelClosed);
        }

        ResponseFuture { rx, guard }.await
    }

    /// Run the message dispatch loop.
    ///
    /// Consumes the inbound receiver; can only be called once. Returns when
    /// the inbound channel closes.
    pub async fn run(self: &Arc<Self>) {
        let mut inbound_rx = self
            .inbound_rx
            .lock()
            .take()
            .expect("run() can only be called once - inbound receiver already taken");

        while let Some(message_value) = inbound_rx.recv().await {
            match serde_json::from_value::<Message>(message_value) {
                Ok(message) => {
                    if let Err(e) = self.dispatch_internal(message) {
                        tracing::error!("Error dispatching message: {}", e);
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to parse message: {}", e);
                }
            }
        }

        tracing::debug!("inbound channel closed, dispatch loop finished");
    }

    /// Dispatch an incoming message (test-only public version)
    #[cfg(test)]
    pub fn dispatch(self: &Arc<Self>, message: Message) -> Result<()> {
        self.dispatch_internal(message)
    }

    fn dispatch_internal(self: &Arc<Self>, message: Message) -> Result<()> {
        match message {
            Message::Response(response) => {
                let callback = self.callbacks.lock().remove(&response.id).ok_or_else(|| {
                    Error::ProtocolError(format!(
                        "Cannot find request to respond: id={}",
                        response.id
                    ))
                })?;

                let result = if let Some(error_wrapper) = response.error {
                    Err(parse_protocol_error(error_wrapper.error))
                } else {
                    Ok(response.result.unwrap_or(Value::Null))
                };

                let _ = callback.send(result);
                Ok(())
            }
            Message::Event(event) => match event.method.as_str() {
                "__create__" => self.handle_create(&event),
                "__dispose__" => self.handle_dispose(&event),
                _ => match self.objects.try_get(&event.guid) {
                    Some(object) => {
                        object.on_event(&event.method, event.params);
                        Ok(())
                    }
                    None => {
                        tracing::debug!(
                            "Event for unknown object (ignored): guid={}, method={}",
                            event.guid,
                            event.method
                        );
                        Ok(())
                    }
                },
            },
            Message::Unknown(value) => {
                tracing::debug!(
                    "Unknown message type (forward-compatible, ignored): {}",
                    serde_json::to_string(&value)
                        .unwrap_or_else(|_| "<serialization failed>".to_string())
                );
                Ok(())
            }
        }
    }

    /// Handle `__create__` protocol message
    fn handle_create(self: &Arc<Self>, event: &Event) -> Result<()> {
        let type_name = event.params["type"]
            .as_str()
            .ok_or_else(|| Error::ProtocolError("__create__ missing 'type'".to_string()))?
            .to_string();

        let object_guid: Arc<str> = Arc::from(
            event.params["guid"]
                .as_str()
                .ok_or_else(|| Error::ProtocolError("__create__ missing 'guid'".to_string()))?,
        );

        tracing::debug!(
            "__create__: type={}, guid={}, parent_guid={}",
            type_name,
            object_guid,
            event.guid
        );

        let initializer = event.params["initializer"].clone();

        let parent_obj = self
            .objects
            .try_get(&event.guid)
            .ok_or_else(|| Error::ProtocolError(format!("Parent object not found: {}", event.guid)))?;

        // The root service object is parented to the connection itself;
        // everything else hangs off a real protocol object.
        let parent_or_conn = if event.guid.is_empty() {
            ParentOrConnection::Connection(Arc::clone(self) as Arc<dyn ConnectionLike>)
        } else {
            ParentOrConnection::Parent(parent_obj.clone())
        };

        let factory = self
            .factory
            .lock()
            .clone()
            .ok_or_else(|| {
                Error::ProtocolError(
                    "ObjectFactory not set - call set_factory() before run()".to_string(),
                )
            })?;

        let object =
            factory.create_object(parent_or_conn, type_name.clone(), object_guid.clone(), initializer)?;

        self.objects.insert(Arc::clone(&object_guid), object.clone());
        parent_obj.add_child(object_guid, object);

        Ok(())
    }

    /// Handle `__dispose__` protocol message
    fn handle_dispose(&self, event: &Event) -> Result<()> {
        match self.objects.try_get(&event.guid) {
            Some(obj) => {
                obj.dispose();
                tracing::debug!("Disposed object: guid={}", event.guid);
            }
            None => {
                tracing::debug!("Dispose for unknown object (ignored): guid={}", event.guid);
            }
        }
        Ok(())
    }
}

/// Converts a host [`ErrorPayload`] into [`Error::Remote`].
fn parse_protocol_error(error: ErrorPayload) -> Error {
    Error::Remote {
        name: error.name.unwrap_or_else(|| "Error".to_string()),
        message: error.message,
        stack: error.stack,
    }
}

impl ConnectionLike for Connection {
    fn send_message(
        &self,
        guid: &str,
        method: &str,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>> {
        let guid = guid.to_string();
        let method = method.to_string();
        Box::pin(async move { Connection::send_message(self, &guid, &method, params).await })
    }

    fn register_object(&self, guid: Arc<str>, object: Arc<dyn ChannelOwner>) {
        self.objects.insert(guid, object);
    }

    fn unregister_object(&self, guid: &str) {
        self.objects.remove(guid);
    }

    fn get_object(&self, guid: &str) -> Result<Arc<dyn ChannelOwner>> {
        self.objects
            .try_get(guid)
            .ok_or_else(|| Error::ObjectNotFound {
                guid: guid.to_string(),
                expected: None,
            })
    }

    fn wait_for_object(
        &self,
        guid: &str,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn ChannelOwner>>> + Send + '_>> {
        let guid = guid.to_string();
        Box::pin(async move { self.objects.wait_for(&guid, timeout).await })
    }
}
