//! Gateway event handler trait and utilities.
//!
//! This module defines the object-safe `GatewayHandler` trait through which
//! the gateway surfaces broker activity to the application: one method per
//! event kind, every method defaulted to a no-op, all invoked synchronously
//! from within the poll loop.
//!
//! # Object Safety
//!
//! The trait is dyn-compatible (`&mut dyn GatewayHandler`), so handlers can
//! be stored in a `StaticCell` and handed to tasks without generic type
//! parameters, and the gateway itself stays free of handler generics.
//!
//! # Responding to RPCs
//!
//! `on_rpc` cannot publish the response directly: the method name and
//! parameters borrow from the transport's receive buffer. Record what is
//! needed and call `Gateway::rpc_response` after `poll()` returns.

use crate::payload::Fields;
use crate::transport::QoS;

/// Object-safe trait for application callbacks.
///
/// Each method corresponds to one event kind and defaults to a no-op, so a
/// handler implements only what it cares about.
pub trait GatewayHandler {
    /// The broker connection was established (first connect and reconnects).
    fn on_connect(&mut self) {}

    /// The broker connection was lost or explicitly closed.
    fn on_disconnect(&mut self) {}

    /// A topic filter subscription was granted.
    fn on_subscribe(&mut self, _topic: &str, _granted: QoS) {}

    /// A topic filter subscription was removed.
    fn on_unsubscribe(&mut self, _topic: &str) {}

    /// A message arrived on a topic that is not the device's RPC topic.
    fn on_message(&mut self, _topic: &str, _payload: &[u8]) {}

    /// An RPC invocation arrived for the device.
    fn on_rpc(&mut self, _device: &str, _rpc_id: u32, _method: &str, _params: &Fields<'_>) {}
}

/// A no-op handler.
///
/// Useful as a placeholder or for testing.
pub struct NoopHandler;

impl GatewayHandler for NoopHandler {}

/// A composite handler that fans every event out to two handlers.
///
/// Use this to compose independent concerns (say, an RPC dispatcher and a
/// link-state LED) into the single handler slot.
pub struct HandlerPair<A, B> {
    /// First handler
    pub first: A,
    /// Second handler
    pub second: B,
}

impl<A, B> HandlerPair<A, B> {
    /// Combines two handlers into one.
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A, B> GatewayHandler for HandlerPair<A, B>
where
    A: GatewayHandler,
    B: GatewayHandler,
{
    fn on_connect(&mut self) {
        self.first.on_connect();
        self.second.on_connect();
    }

    fn on_disconnect(&mut self) {
        self.first.on_disconnect();
        self.second.on_disconnect();
    }

    fn on_subscribe(&mut self, topic: &str, granted: QoS) {
        self.first.on_subscribe(topic, granted);
        self.second.on_subscribe(topic, granted);
    }

    fn on_unsubscribe(&mut self, topic: &str) {
        self.first.on_unsubscribe(topic);
        self.second.on_unsubscribe(topic);
    }

    fn on_message(&mut self, topic: &str, payload: &[u8]) {
        self.first.on_message(topic, payload);
        self.second.on_message(topic, payload);
    }

    fn on_rpc(&mut self, device: &str, rpc_id: u32, method: &str, params: &Fields<'_>) {
        self.first.on_rpc(device, rpc_id, method, params);
        self.second.on_rpc(device, rpc_id, method, params);
    }
}

/// Blanket implementation for mutable references to trait objects.
///
/// This allows using `&mut dyn GatewayHandler` wherever a handler is
/// expected.
impl<H: GatewayHandler + ?Sized> GatewayHandler for &mut H {
    fn on_connect(&mut self) {
        (**self).on_connect()
    }

    fn on_disconnect(&mut self) {
        (**self).on_disconnect()
    }

    fn on_subscribe(&mut self, topic: &str, granted: QoS) {
        (**self).on_subscribe(topic, granted)
    }

    fn on_unsubscribe(&mut self, topic: &str) {
        (**self).on_unsubscribe(topic)
    }

    fn on_message(&mut self, topic: &str, payload: &[u8]) {
        (**self).on_message(topic, payload)
    }

    fn on_rpc(&mut self, device: &str, rpc_id: u32, method: &str, params: &Fields<'_>) {
        (**self).on_rpc(device, rpc_id, method, params)
    }
}
