//! # Longeron
//!
//! A pipelined publish/subscribe client engine for NATS-style brokers.
//!
//! ## Architecture
//!
//! Longeron is structured as a **client kernel** with clean layering:
//!
//! - **`longeron-core`**: bounded queues, command pooling, completion
//!   cells, backoff, subject matching
//! - **`longeron-nats`**: the protocol engine (writer loop, connection
//!   state machine, subscription dispatch)
//! - **`longeron`**: public API surface (this crate)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use longeron::{Client, ConnectOptions};
//!
//! #[compio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::connect("127.0.0.1:4222", ConnectOptions::default()).await?;
//!
//!     // Subscribe with a wildcard pattern
//!     let mut sub = client.subscribe("orders.*").await?;
//!
//!     // Publish; resolves once the writer has flushed the frame
//!     client.publish("orders.eu", &b"created"[..]).await?;
//!
//!     if let Some(msg) = sub.next().await {
//!         println!("{} -> {:?}", msg.subject, msg.payload);
//!     }
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Guarantees
//!
//! - **Ordering**: commands complete in enqueue order per connection;
//!   dispatch preserves per-subscription arrival order
//! - **Backpressure**: the command queue and every subscription queue are
//!   bounded; overflow behavior is configurable per subscription
//! - **Zero loss across reconnects**: work serialized but unconfirmed at
//!   disconnect time is replayed ahead of new traffic

#![warn(missing_docs)]
#![warn(clippy::all)]

// Re-export core types
pub use bytes::Bytes;

pub use longeron_nats::{
    Client, ConnectOptions, ConnectionState, HeaderMap, JsonCodec, LongeronError, Msg,
    OverflowPolicy, PayloadCodec, PublishOptions, RawCodec, ReconnectPolicy, Result,
    SubscribeOptions, Subscriber,
};

/// Transport abstraction for custom or in-memory transports.
pub mod transport {
    pub use longeron_nats::transport::{
        mem, Connector, TcpConnector, TcpTransport, Transport, TransportReader, TransportWriter,
    };
}

pub mod dev_tracing;
