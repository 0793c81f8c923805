//! # StageLink Client
//!
//! Persistent-connection control client for StageLink AV processors.
//!
//! The device exposes its control surface as JSON frames over a single
//! multiplexed WebSocket. This crate provides:
//!
//! - Connection lifecycle management with automatic reconnection
//! - Heartbeat-based liveness detection
//! - Request/response correlation with per-request timeout
//! - Event subscriptions replayed after every reconnect
//! - FIFO buffering of commands issued while disconnected
//! - Single-flight cached loading of the device's active design
//!
//! # Quick Start
//!
//! ```no_run
//! use stagelink_client::{Client, ClientConfig, DesignCache};
//! use stagelink_core::retry::RetryPolicy;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .host("192.168.1.50")
//!         .api_key("secret")
//!         .build();
//!
//!     let client = Client::new(config);
//!     client.connect();
//!
//!     client.subscribe("levelSubscribe", "levelUpdate", |frame| {
//!         println!("level update: {:?}", frame.payload);
//!     })?;
//!
//!     let designs = DesignCache::new(client.clone(), RetryPolicy::indefinite());
//!     let design = designs.design().await?;
//!     println!("active design: {}", design.name);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Connection manager** ([`Client`]): owns the socket, drives
//!   connect/reconnect, composes the components below
//! - **Request correlator**: matches responses to requests by identifier
//! - **Subscription registry**: records subscription payloads for replay
//! - **Event dispatcher**: routes pushed events to handlers by message kind
//! - **Heartbeat monitor**: liveness via periodic `heartbeat` frames
//! - **Single-flight coordinator** ([`SingleFlight`]): coalesces concurrent
//!   loads of shared remote state

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]

/// Client configuration
pub mod config;

/// Connection manager
pub mod connection;

/// Cached access to the device's active design
pub mod design;

/// Wire protocol frames
pub mod protocol;

/// Single-flight load coordination
pub mod single_flight;

/// Connection state
pub mod state;

mod correlator;
mod dispatcher;
mod heartbeat;
mod registry;

pub use config::{ClientConfig, ClientConfigBuilder};
pub use connection::Client;
pub use design::{Component, Design, DesignCache};
pub use protocol::{kind, Frame, SubscribeBody};
pub use single_flight::SingleFlight;
pub use state::ConnectionState;
