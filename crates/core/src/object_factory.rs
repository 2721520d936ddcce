// Copyright 2024 Paul Adamson
// Licensed under the Apache License, Version 2.0
//
// Object Factory - creates protocol objects from wire type names.
//
// When the host sends a `__create__` message, the factory instantiates
// the matching client-side object. Unknown types become inert objects so
// a newer host does not break an older client.

use crate::{BrowsingContext, Page, Recorder, Session, SessionController};
use bext_runtime::channel_owner::{ChannelOwner, ChannelOwnerImpl, ParentOrConnection};
use bext_runtime::{Error, Result};
use serde_json::Value;
use std::sync::Arc;

/// Creates a protocol object from a `__create__` message.
pub(crate) fn create_object(
    parent: ParentOrConnection,
    type_name: String,
    guid: Arc<str>,
    initializer: Value,
) -> Result<Arc<dyn ChannelOwner>> {
    let object: Arc<dyn ChannelOwner> = match type_name.as_str() {
        "Controller" => {
            // The controller is the root service object; its parent is
            // the connection itself.
            let connection = match parent {
                ParentOrConnection::Connection(connection) => connection,
                ParentOrConnection::Parent(_) => {
                    return Err(Error::ProtocolError(
                        "Controller must have Connection as parent".to_string(),
                    ));
                }
            };

            Arc::new(SessionController::new(
                connection,
                type_name,
                guid,
                initializer,
            )?)
        }

        "Session" => {
            let parent_owner = require_parent(parent, "Session must have Controller as parent")?;
            Arc::new(Session::new(parent_owner, type_name, guid, initializer)?)
        }

        "BrowsingContext" => {
            let parent_owner =
                require_parent(parent, "BrowsingContext must have Session as parent")?;
            Arc::new(BrowsingContext::new(
                parent_owner,
                type_name,
                guid,
                initializer,
            )?)
        }

        "Page" => {
            let parent_owner =
                require_parent(parent, "Page must have BrowsingContext as parent")?;
            Arc::new(Page::new(parent_owner, type_name, guid, initializer)?)
        }

        "Recorder" => {
            let parent_owner = require_parent(parent, "Recorder must have Session as parent")?;
            Arc::new(Recorder::new(parent_owner, type_name, guid, initializer)?)
        }

        _ => {
            tracing::debug!("Unknown protocol type (forward-compatible): {}", type_name);
            Arc::new(UnknownObject::new(parent, type_name, guid, initializer))
        }
    };

    Ok(object)
}

fn require_parent(
    parent: ParentOrConnection,
    context: &str,
) -> Result<Arc<dyn ChannelOwner>> {
    match parent {
        ParentOrConnection::Parent(parent) => Ok(parent),
        ParentOrConnection::Connection(_) => Err(Error::ProtocolError(context.to_string())),
    }
}

/// Inert stand-in for object types this client does not know.
struct UnknownObject {
    base: ChannelOwnerImpl,
}

impl UnknownObject {
    fn new(
        parent: ParentOrConnection,
        type_name: String,
        guid: Arc<str>,
        initializer: Value,
    ) -> Self {
        let base = ChannelOwnerImpl::new(parent, type_name, guid, initializer);
        Self { base }
    }
}

impl bext_runtime::channel_owner::private::Sealed for UnknownObject {}

impl ChannelOwner for UnknownObject {
    fn guid(&self) -> &str {
        self.base.guid()
    }

    fn type_name(&self) -> &str {
        self.base.type_name()
    }

    fn parent(&self) -> Option<Arc<dyn ChannelOwner>> {
        self.base.parent()
    }

    fn connection(&self) -> Arc<dyn bext_runtime::connection::ConnectionLike> {
        self.base.connection()
    }

    fn initializer(&self) -> &Value {
        self.base.initializer()
    }

    fn channel(&self) -> &bext_runtime::channel::Channel {
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

    fn on_event(&self, _method: &str, _params: Value) {}
}
