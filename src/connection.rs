//! # Connection Manager
//!
//! Owns the transport handle and drives the connection lifecycle: the
//! bounded connect handshake, explicit disconnect, reconnection with bounded
//! exponential backoff, and re-establishment of the subscription set after
//! every reconnect.
//!
//! The state machine:
//!
//! ```text
//! Disconnected --connect()--> Connecting --ok--> Connected
//!      ^                          |fail              |link loss
//!      |                          v                  v
//!      +----<--- disconnect() --- Disconnected   Reconnecting <--+
//!                                                    |attempt    |fail,
//!                                                    +--ok--> Connected
//! ```
//!
//! Reconnection never sleeps: `try_reconnect` is deadline-gated against
//! `Instant::now()` so the poll loop stays non-blocking while the backoff
//! timer runs down.

use core::pin::pin;

use embassy_time::{Duration, Instant, Timer};
use futures::future::{Either, select};

use crate::error::GatewayError;
use crate::handler::GatewayHandler;
use crate::subscriptions::SubscriptionSet;
use crate::transport::{Credentials, GatewayTransport, InboundMessage, QoS};

/// The connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    /// No broker session; nothing is retried automatically.
    Disconnected,
    /// A connect handshake is in flight.
    Connecting,
    /// The broker session is live; publish and subscribe may succeed.
    Connected,
    /// The link was lost; attempts run on the backoff schedule.
    Reconnecting,
}

/// Configuration for a gateway session.
///
/// An explicit value passed at construction; the crate keeps no process-wide
/// state.
#[derive(Debug, Clone, Copy)]
pub struct GatewayOptions<'a> {
    /// Broker hostname.
    pub host: &'a str,
    /// Broker port.
    pub port: u16,
    /// Opaque credential token, passed through to the transport.
    pub credentials: Credentials<'a>,
    /// Upper bound for one connect handshake.
    pub connect_timeout: Duration,
    /// Upper bound for one inbound poll inside `Gateway::poll`.
    pub poll_timeout: Duration,
    /// First reconnect delay.
    pub reconnect_min: Duration,
    /// Reconnect delay ceiling.
    pub reconnect_max: Duration,
}

impl<'a> GatewayOptions<'a> {
    /// Creates options with default timing for the given broker and token.
    pub fn new(host: &'a str, port: u16, token: &'a str) -> Self {
        Self {
            host,
            port,
            credentials: Credentials::new(token),
            connect_timeout: Duration::from_secs(10),
            poll_timeout: Duration::from_millis(100),
            reconnect_min: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
        }
    }
}

/// Bounded exponential backoff: doubles from `min` up to `max`.
#[derive(Debug)]
pub(crate) struct Backoff {
    next: Duration,
    min: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { next: min, min, max }
    }

    /// Back to the initial delay.
    pub fn reset(&mut self) {
        self.next = self.min;
    }

    /// The delay to wait before the next attempt; doubles the following one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        let doubled = self.next * 2;
        self.next = if doubled > self.max { self.max } else { doubled };
        delay
    }
}

/// Owns the transport and the connection lifecycle.
pub struct ConnectionManager<'a, T: GatewayTransport, const MAX_TOPICS: usize> {
    transport: T,
    options: GatewayOptions<'a>,
    state: ConnectionState,
    subscriptions: SubscriptionSet<MAX_TOPICS>,
    backoff: Backoff,
    next_attempt: Option<Instant>,
}

impl<'a, T: GatewayTransport, const MAX_TOPICS: usize> ConnectionManager<'a, T, MAX_TOPICS> {
    /// Creates a manager in the `Disconnected` state.
    pub fn new(transport: T, options: GatewayOptions<'a>) -> Self {
        let backoff = Backoff::new(options.reconnect_min, options.reconnect_max);
        Self {
            transport,
            options,
            state: ConnectionState::Disconnected,
            subscriptions: SubscriptionSet::new(),
            backoff,
            next_attempt: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The session configuration.
    pub fn options(&self) -> &GatewayOptions<'a> {
        &self.options
    }

    /// Shared access to the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Exclusive access to the transport, for transport-specific control.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The subscription set reasserted on every `Connected` transition.
    pub fn subscriptions(&self) -> &SubscriptionSet<MAX_TOPICS> {
        &self.subscriptions
    }

    pub(crate) fn subscriptions_mut(&mut self) -> &mut SubscriptionSet<MAX_TOPICS> {
        &mut self.subscriptions
    }

    /// Drives the handshake to `Connected`.
    ///
    /// A first-attempt failure is surfaced to the caller and leaves the
    /// manager `Disconnected`; retry policy for the initial connect is
    /// caller-driven.
    pub async fn connect(
        &mut self,
        handler: &mut dyn GatewayHandler,
    ) -> Result<(), GatewayError<T::Error>> {
        if self.state == ConnectionState::Connected {
            return Ok(());
        }
        self.state = ConnectionState::Connecting;
        match self.establish(handler).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// One full connection attempt: bounded transport connect, `on_connect`,
    /// subscription reassertion. Leaves the state at `Connected` on success;
    /// the caller decides the state on failure.
    async fn establish(
        &mut self,
        handler: &mut dyn GatewayHandler,
    ) -> Result<(), GatewayError<T::Error>> {
        let connect_fut =
            self.transport
                .connect(self.options.host, self.options.port, &self.options.credentials);
        let timer = Timer::after(self.options.connect_timeout);
        match select(pin!(connect_fut), pin!(timer)).await {
            Either::Left((res, _)) => res?,
            Either::Right(((), _)) => return Err(GatewayError::Timeout),
        }

        self.state = ConnectionState::Connected;
        self.backoff.reset();
        self.next_attempt = None;
        debug!("connected to {}:{}", self.options.host, self.options.port);
        handler.on_connect();

        if let Err(e) = self.reassert_subscriptions(handler).await {
            // A half-open session is worse than none; tear it down.
            let _ = self.transport.disconnect().await;
            return Err(e);
        }
        Ok(())
    }

    async fn reassert_subscriptions(
        &mut self,
        handler: &mut dyn GatewayHandler,
    ) -> Result<(), GatewayError<T::Error>> {
        for filter in self.subscriptions.iter() {
            self.transport.subscribe(filter).await?;
            handler.on_subscribe(filter, QoS::AtMostOnce);
        }
        Ok(())
    }

    /// Records loss of the link reported by the transport.
    pub fn mark_lost(&mut self, handler: &mut dyn GatewayHandler) {
        if self.state != ConnectionState::Connected {
            return;
        }
        warn!("link lost, entering reconnect");
        self.state = ConnectionState::Reconnecting;
        self.backoff.reset();
        self.next_attempt = Some(Instant::now() + self.backoff.next_delay());
        handler.on_disconnect();
    }

    /// Runs one reconnect attempt if the backoff deadline has elapsed.
    ///
    /// Permanent broker unavailability surfaces only as repeated
    /// `on_disconnect` invocations, never as an error.
    pub async fn try_reconnect(&mut self, handler: &mut dyn GatewayHandler) {
        if self.state != ConnectionState::Reconnecting {
            return;
        }
        if let Some(due) = self.next_attempt {
            if Instant::now() < due {
                return;
            }
        }
        debug!("reconnect attempt");
        self.state = ConnectionState::Connecting;
        if self.establish(handler).await.is_err() {
            self.state = ConnectionState::Reconnecting;
            self.next_attempt = Some(Instant::now() + self.backoff.next_delay());
            handler.on_disconnect();
        }
    }

    /// Closes the session explicitly and cancels any pending reconnect.
    pub async fn disconnect(&mut self, handler: &mut dyn GatewayHandler) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        let _ = self.transport.disconnect().await;
        self.state = ConnectionState::Disconnected;
        self.backoff.reset();
        self.next_attempt = None;
        handler.on_disconnect();
    }

    /// Publishes one message at QoS 0; fails fast outside `Connected`.
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
    ) -> Result<(), GatewayError<T::Error>> {
        if self.state != ConnectionState::Connected {
            return Err(GatewayError::NotConnected);
        }
        self.transport.publish(topic, payload, QoS::AtMostOnce).await?;
        Ok(())
    }

    /// Subscribes immediately; fails fast outside `Connected`.
    pub async fn subscribe_now(
        &mut self,
        filter: &str,
        handler: &mut dyn GatewayHandler,
    ) -> Result<(), GatewayError<T::Error>> {
        if self.state != ConnectionState::Connected {
            return Err(GatewayError::NotConnected);
        }
        self.transport.subscribe(filter).await?;
        handler.on_subscribe(filter, QoS::AtMostOnce);
        Ok(())
    }

    /// Unsubscribes immediately; fails fast outside `Connected`.
    pub async fn unsubscribe_now(
        &mut self,
        filter: &str,
        handler: &mut dyn GatewayHandler,
    ) -> Result<(), GatewayError<T::Error>> {
        if self.state != ConnectionState::Connected {
            return Err(GatewayError::NotConnected);
        }
        self.transport.unsubscribe(filter).await?;
        handler.on_unsubscribe(filter);
        Ok(())
    }

    /// Waits up to the configured poll timeout for one inbound message.
    pub async fn poll_inbound(&mut self) -> Result<Option<InboundMessage<'_>>, T::Error> {
        self.transport.poll(self.options.poll_timeout).await
    }
}
