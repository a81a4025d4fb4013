//! # MQTT Session Transport Abstraction
//!
//! This module defines the `GatewayTransport` trait, which abstracts the
//! underlying MQTT client session (TCP or TLS socket, packet framing,
//! keep-alive), allowing the gateway to be network-stack agnostic.
//!
//! The trait is message-level: the collaborator is expected to be a complete
//! MQTT 3.1.1 client that delivers already-framed (topic, payload) pairs.
//! With the Rust 2024 Edition the trait uses native `async fn`, removing the
//! need for the `#[async_trait]` macro.

use embassy_time::Duration;

/// A marker trait for transport-related errors.
pub trait TransportError: core::fmt::Debug {}

/// Represents the Quality of Service (QoS) levels for MQTT messages.
///
/// The gateway itself only ever publishes at `AtMostOnce`; the full enum is
/// part of the transport contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

/// An opaque credential token, passed through to the transport unmodified.
///
/// The gateway never inspects or persists the token; it is typically an
/// access token loaded from a local secret store by the caller.
#[derive(Debug, Clone, Copy)]
pub struct Credentials<'a> {
    token: &'a str,
}

impl<'a> Credentials<'a> {
    /// Wraps a raw access token.
    pub fn new(token: &'a str) -> Self {
        Self { token }
    }

    /// The raw token, for the transport to present to the broker.
    pub fn token(&self) -> &'a str {
        self.token
    }
}

/// One inbound publish delivered by the transport.
///
/// Both fields borrow from the transport's receive buffer and are only valid
/// until the next transport call.
#[derive(Debug)]
pub struct InboundMessage<'a> {
    /// The topic the message arrived on.
    pub topic: &'a str,
    /// The raw payload bytes.
    pub payload: &'a [u8],
}

/// A trait representing an MQTT session transport for the gateway.
///
/// Implementations own keep-alive and session maintenance; both are expected
/// to be serviced from within `poll`. Every method must complete within a
/// bounded time: `poll` within roughly the given timeout, the others within
/// whatever internal limits the implementation enforces.
#[allow(async_fn_in_trait)]
pub trait GatewayTransport {
    /// The error type returned by the transport.
    type Error: TransportError;

    /// Opens the broker session.
    async fn connect(
        &mut self,
        host: &str,
        port: u16,
        credentials: &Credentials<'_>,
    ) -> Result<(), Self::Error>;

    /// Closes the broker session.
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Subscribes to a topic filter.
    async fn subscribe(&mut self, filter: &str) -> Result<(), Self::Error>;

    /// Removes a topic filter subscription.
    async fn unsubscribe(&mut self, filter: &str) -> Result<(), Self::Error>;

    /// Publishes a single message.
    async fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), Self::Error>;

    /// Waits up to `timeout` for one inbound publish.
    ///
    /// Returns `Ok(None)` when nothing arrived within the timeout. An `Err`
    /// is treated by the gateway as loss of the link.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<InboundMessage<'_>>, Self::Error>;
}
