//! Connection bootstrap and initialization handshake.
//!
//! [`connect`] wires a [`Connection`] to an embedder-provided message
//! channel pair, spawns the dispatch loop, and performs the `initialize`
//! handshake that yields the root [`SessionController`]:
//!
//! 1. Install the object factory
//! 2. Register a temporary root object under the empty GUID
//! 3. Send `initialize`; the host answers with `__create__` for the
//!    controller followed by a response referencing it
//! 4. Resolve the controller from the registry and drop the root

use crate::SessionController;
use bext_runtime::channel::Channel;
use bext_runtime::channel_owner::{ChannelOwner, ChannelOwnerImpl, ParentOrConnection};
use bext_runtime::connection::{Connection, ConnectionLike, ObjectFactory};
use bext_runtime::{Error, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long the host gets to answer the `initialize` handshake.
const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(30);

/// Connects to an automation host reachable through the given message
/// channels and returns its session controller.
///
/// `outbound` carries serialized requests toward the host; `inbound`
/// carries the host's responses and events. The embedder bridges both to
/// whatever transport actually reaches the extension (a message port, a
/// WebSocket, a pipe).
///
/// # Errors
///
/// Returns an error if the handshake fails or the host does not answer
/// within 30 seconds.
pub async fn connect(
    outbound: mpsc::UnboundedSender<Value>,
    inbound: mpsc::UnboundedReceiver<Value>,
) -> Result<SessionController> {
    let connection = Arc::new(Connection::new(outbound, inbound));
    connection.set_factory(Arc::new(DefaultObjectFactory));

    let dispatch_connection = Arc::clone(&connection);
    tokio::spawn(async move {
        dispatch_connection.run().await;
    });

    initialize_controller(&connection).await
}

/// Performs the `initialize` handshake and resolves the controller.
async fn initialize_controller(connection: &Arc<Connection>) -> Result<SessionController> {
    let root = Arc::new(Root::new(
        Arc::clone(connection) as Arc<dyn ConnectionLike>
    ));

    connection.register_object(Arc::from(""), root.clone() as Arc<dyn ChannelOwner>);

    tracing::debug!("root registered, sending initialize");

    let response = tokio::time::timeout(INITIALIZE_TIMEOUT, root.initialize())
        .await
        .map_err(|_| Error::Timeout("Initialization timeout after 30 seconds".to_string()))??;

    let controller_guid = response["controller"]["guid"].as_str().ok_or_else(|| {
        Error::ProtocolError("Initialize response missing 'controller.guid'".to_string())
    })?;

    tracing::debug!(guid = controller_guid, "initialized controller");

    let controller_obj = connection.get_object(controller_guid)?;

    let controller = controller_obj
        .downcast_ref::<SessionController>()
        .cloned()
        .ok_or_else(|| Error::ObjectNotFound {
            guid: controller_guid.to_string(),
            expected: Some("Controller"),
        })?;

    // The root only exists to anchor the handshake.
    connection.unregister_object("");

    Ok(controller)
}

/// Temporary root object the handshake is sent through.
///
/// Registered under the empty GUID so the host can parent the controller's
/// `__create__` to it; unregistered as soon as the handshake completes.
struct Root {
    base: ChannelOwnerImpl,
}

impl Root {
    fn new(connection: Arc<dyn ConnectionLike>) -> Self {
        let base = ChannelOwnerImpl::new(
            ParentOrConnection::Connection(connection),
            "Root".to_string(),
            Arc::from(""),
            Value::Null,
        );
        Self { base }
    }

    async fn initialize(&self) -> Result<Value> {
        self.base
            .channel()
            .send(
                "initialize",
                serde_json::json!({
                    "client": { "name": "bext", "version": env!("CARGO_PKG_VERSION") }
                }),
            )
            .await
    }
}

impl bext_runtime::channel_owner::private::Sealed for Root {}

impl ChannelOwner for Root {
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
        self.base.on_event(method, params)
    }
}

/// Default object factory that creates protocol objects.
struct DefaultObjectFactory;

impl ObjectFactory for DefaultObjectFactory {
    fn create_object(
        &self,
        parent: ParentOrConnection,
        type_name: String,
        guid: Arc<str>,
        initializer: Value,
    ) -> Result<Arc<dyn ChannelOwner>> {
        crate::object_factory::create_object(parent, type_name, guid, initializer)
    }
}
