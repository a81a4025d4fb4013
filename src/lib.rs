//! # MQTT Device Gateway for Embedded Systems
//!
//! `telegate-mqtt` is a `no_std` compatible device-to-cloud telemetry and
//! RPC gateway layer over MQTT, designed for resource-constrained devices.
//!
//! ## Core Features
//!
//! - **`no_std` & `no_alloc`:** Runs on bare-metal microcontrollers without a
//!   standard library or dynamic memory allocation. Buffers and tables are
//!   managed using `heapless` with const-generic capacities.
//! - **Fully Async:** Built with `async/await`; timing comes from
//!   `embassy-time`, so any cooperative executor can drive the gateway.
//! - **Rust 2024 Edition:** Uses native `async fn` in traits, removing the
//!   need for `async-trait`.
//! - **Transport Agnostic:** The `GatewayTransport` trait abstracts the MQTT
//!   session itself (TCP or TLS, any client), so the gateway only deals in
//!   topics and payloads.
//! - **Bounded Everywhere:** A single non-blocking `poll()` pass, a bounded
//!   in-flight RPC table with oldest-first eviction, bounded reconnect
//!   backoff, and no outbound queues: a publish that cannot be delivered
//!   fails synchronously.
//!
//! ## Architecture
//!
//! The application registers one [`GatewayHandler`] and drives the gateway
//! from its scheduling loop:
//!
//! ```ignore
//! use telegate_mqtt::{Gateway, GatewayHandler, GatewayOptions, Value};
//!
//! struct App;
//!
//! impl GatewayHandler for App {
//!     fn on_rpc(&mut self, device: &str, rpc_id: u32, method: &str,
//!               params: &telegate_mqtt::payload::Fields<'_>) {
//!         // Record the request here; answer it after poll() returns.
//!     }
//! }
//!
//! let options = GatewayOptions::new("broker.example.net", 1883, token);
//! let mut handler = App;
//! let mut gateway = Gateway::<_, 4, 1024>::new(transport, options, &mut handler);
//!
//! gateway.connect().await?;
//! gateway.device_connect(device_name).await?;
//! gateway.subscribe_to_rpcs().await?;
//!
//! loop {
//!     gateway.poll().await;
//!     if telemetry_due() {
//!         // While disconnected this fails fast; skip the cycle and retry.
//!         let _ = gateway
//!             .publish_telemetry(&[("cpu.temperature", cpu_temp().into())])
//!             .await;
//!     }
//! }
//! ```
//!
//! ## Answering RPCs
//!
//! Inbound RPC data borrows from the transport's receive buffer, so the
//! handler cannot publish the response from inside `on_rpc`. Record what is
//! needed, then call [`Gateway::rpc_response`] after `poll()` returns; the
//! correlator tracks which ids are pending and rejects duplicate or unknown
//! responses with `UnknownRpc`.

#![no_std]

#[cfg(test)]
extern crate std;

#[macro_use]
mod fmt;

pub mod connection;
pub mod error;
pub mod gateway;
pub mod handler;
mod json;
pub mod payload;
pub mod rpc;
pub mod subscriptions;
pub mod topic;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export key types for easier access at the crate root.
pub use connection::{ConnectionState, GatewayOptions};
pub use error::{DecodeError, EncodeError, GatewayError};
pub use gateway::Gateway;
pub use handler::{GatewayHandler, HandlerPair, NoopHandler};
pub use payload::Value;
pub use topic::GatewayTopic;
pub use transport::{Credentials, GatewayTransport, InboundMessage, QoS};
