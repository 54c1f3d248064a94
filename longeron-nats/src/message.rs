//! Inbound messages.

use std::sync::Weak;

use bytes::Bytes;

use longeron_core::error::{LongeronError, Result};

use crate::codec::{JsonCodec, PayloadCodec};
use crate::connection::ConnectionCore;
use crate::headers::HeaderMap;

/// One message delivered to a subscription.
///
/// The payload is a refcounted byte slice; decoding to a typed value is
/// explicit and on demand. The message holds only a weak reference to its
/// originating connection, used solely to support [`Msg::reply`], so a
/// retained message never extends the connection's lifetime.
#[derive(Debug, Clone)]
pub struct Msg {
    /// Subject the message was published to.
    pub subject: String,
    /// Reply subject for request/reply exchanges.
    pub reply_to: Option<String>,
    /// Message headers, when the broker delivered any.
    pub headers: Option<HeaderMap>,
    /// Raw payload bytes.
    pub payload: Bytes,
    /// Wire size of the delivered frame (subject, reply, headers, payload).
    pub length: usize,
    pub(crate) connection: Weak<ConnectionCore>,
}

impl Msg {
    /// Decode the payload with the default JSON codec.
    ///
    /// # Errors
    ///
    /// Returns a deserialization error when the payload does not parse.
    pub fn decode<T>(&self) -> Result<T>
    where
        JsonCodec: PayloadCodec<T>,
    {
        self.decode_with(&JsonCodec)
    }

    /// Decode the payload with an explicit codec.
    ///
    /// # Errors
    ///
    /// Returns a deserialization error when the payload does not parse.
    pub fn decode_with<T, C: PayloadCodec<T>>(&self, codec: &C) -> Result<T> {
        codec.decode(&self.payload)
    }

    /// Publish a reply to this message's reply subject.
    ///
    /// # Errors
    ///
    /// Fails when the message carries no reply subject or the originating
    /// connection is gone.
    pub async fn reply(&self, payload: impl Into<Bytes>) -> Result<()> {
        let Some(reply_to) = self.reply_to.as_deref() else {
            return Err(LongeronError::protocol("message has no reply subject"));
        };
        let Some(core) = self.connection.upgrade() else {
            return Err(LongeronError::ConnectionClosed);
        };
        core.publish_parts(reply_to, None, None, payload.into(), None)
            .await
    }
}
