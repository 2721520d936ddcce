//! Channel - RPC communication proxy for ChannelOwner objects.
//!
//! The Channel provides a typed interface for sending JSON-RPC messages
//! to the automation host on behalf of a ChannelOwner object.

use crate::connection::ConnectionLike;
use crate::error::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// Wire shape of a reference to another protocol object.
///
/// Responses and events never embed objects; they reference them by GUID
/// and the object itself arrives separately via `__create__`.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct RemoteRef {
    /// GUID of the referenced object.
    #[serde(
        serialize_with = "crate::connection::serialize_arc_str",
        deserialize_with = "crate::connection::deserialize_arc_str"
    )]
    pub guid: Arc<str>,
}

/// Channel provides RPC communication for a ChannelOwner.
///
/// Every ChannelOwner has a Channel that sends method calls to the host
/// and receives responses.
#[derive(Clone)]
pub struct Channel {
    guid: Arc<str>,
    connection: Arc<dyn ConnectionLike>,
}

impl Channel {
    /// Creates a new Channel for the given object GUID.
    pub fn new(guid: Arc<str>, connection: Arc<dyn ConnectionLike>) -> Self {
        Self { guid, connection }
    }

    /// Sends a method call to the host and awaits the typed response.
    pub async fn send<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R> {
        let params_value = serde_json::to_value(params)?;
        let response = self
            .connection
            .send_message(&self.guid, method, params_value)
            .await?;
        serde_json::from_value(response).map_err(Into::into)
    }

    /// Sends a method call that returns no result (void).
    pub async fn send_no_result<P: Serialize>(&self, method: &str, params: P) -> Result<()> {
        let _: Value = self.send(method, params).await?;
        Ok(())
    }

    /// Returns the GUID this channel represents.
    pub fn guid(&self) -> &str {
        &self.guid
    }
}
