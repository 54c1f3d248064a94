//! # Longeron NATS
//!
//! NATS-style pub/sub client engine: protocol pipelining, subscription
//! dispatch, and connection lifecycle over one multiplexed transport.
//!
//! ## Overview
//!
//! - **Pipelined writer**: one task per connection batches queued commands
//!   into a shared buffer and flushes them as few transport writes
//! - **Bounded everywhere**: the command queue and every subscription
//!   queue are bounded, with explicit overflow policies
//! - **Zero-loss reconnect**: serialized-but-unconfirmed work is captured
//!   on disconnect and replayed ahead of new traffic
//! - **Command pooling**: hot-path operations recycle command objects
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use longeron_nats::{Client, ConnectOptions};
//!
//! #[compio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::connect("127.0.0.1:4222", ConnectOptions::default()).await?;
//!
//!     let mut sub = client.subscribe("greetings.*").await?;
//!     client.publish("greetings.world", &b"hello"[..]).await?;
//!
//!     if let Some(msg) = sub.next().await {
//!         println!("{}: {:?}", msg.subject, msg.payload);
//!     }
//!     Ok(())
//! }
//! ```

// Allow some pedantic lints
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::match_same_arms)]

pub mod codec;
pub mod command; // Made public for integration tests
pub mod connection;
pub mod headers;
pub mod manager; // Made public for integration tests
pub mod message;
pub mod proto;
pub mod subscription;
pub mod transport;
pub mod writer; // Made public for integration tests

// Re-export the public API surface
pub use codec::{JsonCodec, PayloadCodec, RawCodec};
pub use connection::{Client, ConnectionState, PublishOptions};
pub use headers::HeaderMap;
pub use message::Msg;
pub use subscription::{SubscribeOptions, Subscriber};

// Re-export kernel types callers configure the engine with
pub use longeron_core::backoff::ReconnectPolicy;
pub use longeron_core::error::{LongeronError, Result};
pub use longeron_core::options::ConnectOptions;
pub use longeron_core::queue::OverflowPolicy;
