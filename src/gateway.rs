//! # Gateway Core
//!
//! Orchestrates the codec, correlator and connection layers behind the
//! public device-gateway API: announce a device, publish telemetry and
//! attributes, receive RPC invocations and answer them, all driven by a
//! single-pass non-blocking [`Gateway::poll`] loop.
//!
//! The gateway is single-owner and cooperative: call `poll()` on a steady
//! cadence from the application's scheduling loop. All blocking is bounded
//! (`poll_timeout` for the poll pass, `connect_timeout` for the handshake);
//! nothing is ever queued: a publish that cannot be delivered fails
//! synchronously and the caller simply retries next cycle.

use heapless::String;

use crate::connection::{ConnectionManager, ConnectionState, GatewayOptions};
use crate::error::{EncodeError, GatewayError};
use crate::handler::GatewayHandler;
use crate::payload::{
    Attributes, DeviceConnect, DeviceDisconnect, EncodePayload, DecodePayload, Fields, RpcRequest,
    RpcResponse, Telemetry, Value,
};
use crate::rpc::{MAX_INFLIGHT_RPCS, RpcCorrelator};
use crate::topic::{self, GatewayTopic, MAX_TOPIC_LEN};
use crate::transport::{GatewayTransport, InboundMessage};

/// Maximum length of a device name.
pub const MAX_DEVICE_NAME: usize = 64;

/// The device-to-cloud gateway.
///
/// Generic over the MQTT session transport `T`; `MAX_TOPICS` bounds the
/// subscription set and `BUF_SIZE` the outbound frame scratch buffer.
///
/// ```ignore
/// let mut gateway = Gateway::<_, 4, 1024>::new(transport, options, &mut handler);
/// gateway.connect().await?;
/// gateway.device_connect("EP(AA:BB:CC:DD:EE:FF)").await?;
/// gateway.subscribe_to_rpcs().await?;
/// loop {
///     gateway.poll().await;
///     gateway
///         .publish_telemetry(&[("cpu.temperature", temperature.into())])
///         .await
///         .ok(); // skip the cycle while disconnected
/// }
/// ```
pub struct Gateway<'h, T: GatewayTransport, const MAX_TOPICS: usize, const BUF_SIZE: usize> {
    conn: ConnectionManager<'h, T, MAX_TOPICS>,
    rpc: RpcCorrelator<MAX_INFLIGHT_RPCS>,
    device: Option<String<MAX_DEVICE_NAME>>,
    handler: &'h mut dyn GatewayHandler,
    buf: [u8; BUF_SIZE],
    decode_errors: u32,
}

impl<'h, T: GatewayTransport, const MAX_TOPICS: usize, const BUF_SIZE: usize>
    Gateway<'h, T, MAX_TOPICS, BUF_SIZE>
{
    /// Creates a disconnected gateway.
    ///
    /// The handler is registered once, before the loop starts; every
    /// callback is invoked synchronously from within gateway calls.
    pub fn new(
        transport: T,
        options: GatewayOptions<'h>,
        handler: &'h mut dyn GatewayHandler,
    ) -> Self {
        Self {
            conn: ConnectionManager::new(transport, options),
            rpc: RpcCorrelator::new(),
            device: None,
            handler,
            buf: [0; BUF_SIZE],
            decode_errors: 0,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// Whether publish operations can currently succeed.
    pub fn is_connected(&self) -> bool {
        self.conn.state() == ConnectionState::Connected
    }

    /// The device identity pinned by `device_connect`, if any.
    pub fn device_name(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Number of inbound messages dropped because they failed to decode.
    pub fn decode_error_count(&self) -> u32 {
        self.decode_errors
    }

    /// Number of inbound RPCs awaiting a response.
    pub fn pending_rpcs(&self) -> usize {
        self.rpc.len()
    }

    /// Shared access to the transport.
    pub fn transport(&self) -> &T {
        self.conn.transport()
    }

    /// Exclusive access to the transport, for transport-specific control.
    pub fn transport_mut(&mut self) -> &mut T {
        self.conn.transport_mut()
    }

    /// Connects to the broker.
    pub async fn connect(&mut self) -> Result<(), GatewayError<T::Error>> {
        self.conn.connect(&mut *self.handler).await
    }

    /// Disconnects from the broker and cancels any pending reconnect.
    pub async fn disconnect(&mut self) {
        self.conn.disconnect(&mut *self.handler).await;
    }

    /// Announces the device to the cloud side.
    ///
    /// The first successful call pins the device identity for the session;
    /// calling again with the same name re-announces, a different name is
    /// rejected with `DeviceMismatch`.
    pub async fn device_connect(&mut self, name: &str) -> Result<(), GatewayError<T::Error>> {
        if self.conn.state() != ConnectionState::Connected {
            return Err(GatewayError::NotConnected);
        }
        if !topic::valid_device_name(name) {
            return Err(GatewayError::Encode(EncodeError::InvalidDeviceName));
        }
        match self.device.as_deref() {
            Some(current) if current != name => return Err(GatewayError::DeviceMismatch),
            Some(_) => {}
            None => {
                let mut owned = String::new();
                owned
                    .push_str(name)
                    .map_err(|_| GatewayError::Encode(EncodeError::BufferTooSmall))?;
                self.device = Some(owned);
            }
        }
        let frame = DeviceConnect { device: name };
        let n = frame.encode(&mut self.buf).map_err(GatewayError::Encode)?;
        self.conn.publish(topic::CONNECT_TOPIC, &self.buf[..n]).await
    }

    /// Retires the device on the cloud side; the identity stays pinned.
    pub async fn device_disconnect(&mut self) -> Result<(), GatewayError<T::Error>> {
        if self.conn.state() != ConnectionState::Connected {
            return Err(GatewayError::NotConnected);
        }
        let device = self.device.as_deref().ok_or(GatewayError::NoDevice)?;
        let frame = DeviceDisconnect { device };
        let n = frame.encode(&mut self.buf).map_err(GatewayError::Encode)?;
        self.conn
            .publish(topic::DISCONNECT_TOPIC, &self.buf[..n])
            .await
    }

    /// Adds the device's RPC request filter to the subscription set.
    ///
    /// When connected the subscription is made immediately; otherwise it is
    /// picked up by the next `Connected` transition.
    pub async fn subscribe_to_rpcs(&mut self) -> Result<(), GatewayError<T::Error>> {
        let device = self.device.as_deref().ok_or(GatewayError::NoDevice)?;
        let filter = GatewayTopic::RpcRequest { device }
            .encode::<MAX_TOPIC_LEN>()
            .map_err(GatewayError::Encode)?;
        if !self.conn.subscriptions_mut().add(&filter) {
            return Err(GatewayError::Encode(EncodeError::Capacity));
        }
        if self.conn.state() == ConnectionState::Connected {
            self.conn.subscribe_now(&filter, &mut *self.handler).await?;
        }
        Ok(())
    }

    /// Removes the device's RPC request filter from the subscription set.
    pub async fn unsubscribe_from_rpcs(&mut self) -> Result<(), GatewayError<T::Error>> {
        let device = self.device.as_deref().ok_or(GatewayError::NoDevice)?;
        let filter = GatewayTopic::RpcRequest { device }
            .encode::<MAX_TOPIC_LEN>()
            .map_err(GatewayError::Encode)?;
        if !self.conn.subscriptions_mut().remove(&filter) {
            return Ok(());
        }
        if self.conn.state() == ConnectionState::Connected {
            self.conn.unsubscribe_now(&filter, &mut *self.handler).await?;
        }
        Ok(())
    }

    /// Publishes one telemetry record for the device.
    pub async fn publish_telemetry(
        &mut self,
        readings: &[(&str, Value<'_>)],
    ) -> Result<(), GatewayError<T::Error>> {
        if self.conn.state() != ConnectionState::Connected {
            return Err(GatewayError::NotConnected);
        }
        let device = self.device.as_deref().ok_or(GatewayError::NoDevice)?;
        let frame = Telemetry::single(device, readings).map_err(GatewayError::Encode)?;
        let n = frame.encode(&mut self.buf).map_err(GatewayError::Encode)?;
        self.conn
            .publish(topic::TELEMETRY_TOPIC, &self.buf[..n])
            .await
    }

    /// Publishes the device's attribute snapshot.
    pub async fn publish_attributes(
        &mut self,
        fields: &[(&str, Value<'_>)],
    ) -> Result<(), GatewayError<T::Error>> {
        if self.conn.state() != ConnectionState::Connected {
            return Err(GatewayError::NotConnected);
        }
        let device = self.device.as_deref().ok_or(GatewayError::NoDevice)?;
        let frame = Attributes::new(device, fields).map_err(GatewayError::Encode)?;
        let n = frame.encode(&mut self.buf).map_err(GatewayError::Encode)?;
        self.conn
            .publish(topic::ATTRIBUTES_TOPIC, &self.buf[..n])
            .await
    }

    /// Answers a pending RPC invocation.
    ///
    /// Fails with `UnknownRpc` if the id is not pending; the correlator
    /// entry is consumed by the attempt, so a transport failure is reported
    /// but never retried (at-most-once response). When not connected the
    /// entry is left pending for a retry after reconnect.
    pub async fn rpc_response(
        &mut self,
        device: &str,
        rpc_id: u32,
        result: &[(&str, Value<'_>)],
    ) -> Result<(), GatewayError<T::Error>> {
        if self.conn.state() != ConnectionState::Connected {
            return Err(GatewayError::NotConnected);
        }
        if !self.rpc.is_pending(rpc_id) {
            return Err(GatewayError::UnknownRpc);
        }
        let response_topic = GatewayTopic::RpcResponse { device }
            .encode::<MAX_TOPIC_LEN>()
            .map_err(GatewayError::Encode)?;
        let frame = RpcResponse {
            id: rpc_id,
            result: Fields::from_slice(result)
                .map_err(|_| GatewayError::Encode(EncodeError::Capacity))?,
        };
        let n = frame.encode(&mut self.buf).map_err(GatewayError::Encode)?;
        self.rpc.complete(rpc_id);
        self.conn.publish(&response_topic, &self.buf[..n]).await
    }

    /// One single pass of the event loop: poll for at most one inbound
    /// message, dispatch it, and return.
    ///
    /// Safe to call on a fixed cadence. Never blocks beyond the configured
    /// poll timeout and never fails: a malformed inbound message is counted
    /// and dropped, loss of the link switches to the reconnect schedule.
    pub async fn poll(&mut self) {
        match self.conn.state() {
            ConnectionState::Connected => match self.conn.poll_inbound().await {
                Ok(Some(msg)) => Self::dispatch(
                    &mut self.rpc,
                    &mut self.decode_errors,
                    &mut *self.handler,
                    self.device.as_deref(),
                    msg,
                ),
                Ok(None) => {}
                Err(_e) => {
                    self.conn.mark_lost(&mut *self.handler);
                }
            },
            ConnectionState::Reconnecting => self.conn.try_reconnect(&mut *self.handler).await,
            ConnectionState::Disconnected | ConnectionState::Connecting => {}
        }
    }

    /// Routes one inbound message. Malformed topics are rejected before any
    /// callback; a malformed RPC payload must never take down the loop.
    fn dispatch(
        rpc: &mut RpcCorrelator<MAX_INFLIGHT_RPCS>,
        decode_errors: &mut u32,
        handler: &mut dyn GatewayHandler,
        device: Option<&str>,
        msg: InboundMessage<'_>,
    ) {
        match GatewayTopic::decode(msg.topic) {
            Err(_) => {
                debug!("dropping message with malformed topic");
                *decode_errors += 1;
            }
            Ok(GatewayTopic::RpcRequest { device: target }) if Some(target) == device => {
                match RpcRequest::decode(msg.payload) {
                    Ok(request) => {
                        rpc.begin_inbound(request.id);
                        handler.on_rpc(target, request.id, request.method, &request.params);
                    }
                    Err(e) => {
                        warn!("dropping malformed rpc payload: {:?}", e);
                        *decode_errors += 1;
                    }
                }
            }
            Ok(_) => handler.on_message(msg.topic, msg.payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockTransport, OwnedValue, RecordingHandler, options_for_test};
    use futures::executor::block_on;

    type TestGateway<'h> = Gateway<'h, MockTransport, 4, 1024>;

    fn connected_gateway<'h>(
        transport: MockTransport,
        handler: &'h mut RecordingHandler,
    ) -> TestGateway<'h> {
        let mut gateway = Gateway::new(transport, options_for_test(), handler);
        block_on(async {
            gateway.connect().await.unwrap();
            gateway.device_connect("A").await.unwrap();
            gateway.subscribe_to_rpcs().await.unwrap();
        });
        gateway
    }

    #[test]
    fn runs_the_full_rpc_scenario() {
        let mut handler = RecordingHandler::default();
        {
            let mut transport = MockTransport::new();
            transport.push_inbound(
                "v1/gateway/rpc/request/A",
                br#"{"rpc_id": 7, "method": "reboot", "params": {}}"#,
            );
            let mut gateway = connected_gateway(transport, &mut handler);

            block_on(gateway.poll());
            assert_eq!(gateway.pending_rpcs(), 1);

            block_on(gateway.rpc_response("A", 7, &[("success", Value::Bool(true))])).unwrap();
            assert_eq!(gateway.pending_rpcs(), 0);

            let published = gateway.transport().published.last().unwrap();
            assert_eq!(published.0, "v1/gateway/rpc/response/A");
            assert_eq!(published.1, br#"{"rpc_id":7,"result":{"success":true}}"#);

            // The id is no longer pending.
            let err = block_on(gateway.rpc_response("A", 7, &[("success", Value::Bool(true))]));
            assert!(matches!(err, Err(GatewayError::UnknownRpc)));
        }
        let rpc = handler.rpcs.last().unwrap();
        assert_eq!(rpc.device, "A");
        assert_eq!(rpc.rpc_id, 7);
        assert_eq!(rpc.method, "reboot");
        assert!(rpc.params.is_empty());
    }

    #[test]
    fn rpc_response_for_an_unknown_id_has_no_side_effect() {
        let mut handler = RecordingHandler::default();
        let mut gateway = connected_gateway(MockTransport::new(), &mut handler);
        let publishes_before = gateway.transport().published.len();
        let err = block_on(gateway.rpc_response("A", 99, &[]));
        assert!(matches!(err, Err(GatewayError::UnknownRpc)));
        assert_eq!(gateway.transport().published.len(), publishes_before);
    }

    #[test]
    fn rpc_response_is_published_exactly_once() {
        let mut handler = RecordingHandler::default();
        let mut transport = MockTransport::new();
        transport.push_inbound(
            "v1/gateway/rpc/request/A",
            br#"{"rpc_id": 3, "method": "ping", "params": {}}"#,
        );
        let mut gateway = connected_gateway(transport, &mut handler);
        block_on(gateway.poll());
        let publishes_before = gateway.transport().published.len();

        block_on(gateway.rpc_response("A", 3, &[("pong", Value::Bool(true))])).unwrap();
        let err = block_on(gateway.rpc_response("A", 3, &[("pong", Value::Bool(true))]));
        assert!(matches!(err, Err(GatewayError::UnknownRpc)));
        assert_eq!(gateway.transport().published.len(), publishes_before + 1);
    }

    #[test]
    fn rpc_params_reach_the_handler() {
        let mut handler = RecordingHandler::default();
        {
            let mut transport = MockTransport::new();
            transport.push_inbound(
                "v1/gateway/rpc/request/A",
                br#"{"rpc_id": 2, "method": "set", "params": {"delay": 5, "mode": "eco"}}"#,
            );
            let mut gateway = connected_gateway(transport, &mut handler);
            block_on(gateway.poll());
        }
        let rpc = handler.rpcs.last().unwrap();
        assert_eq!(rpc.method, "set");
        let expected: std::vec::Vec<(std::string::String, OwnedValue)> = std::vec![
            ("delay".into(), OwnedValue::Int(5)),
            ("mode".into(), OwnedValue::Str("eco".into())),
        ];
        assert_eq!(rpc.params, expected);
    }

    #[test]
    fn publish_telemetry_builds_the_gateway_frame() {
        let mut handler = RecordingHandler::default();
        let mut gateway = connected_gateway(MockTransport::new(), &mut handler);
        block_on(gateway.publish_telemetry(&[
            ("cpu.temperature", Value::Float(42.5)),
            ("gc.mem_free", Value::Int(10240)),
        ]))
        .unwrap();
        let published = gateway.transport().published.last().unwrap();
        assert_eq!(published.0, "v1/gateway/telemetry");
        assert_eq!(
            published.1,
            br#"{"A":[{"cpu.temperature":42.5,"gc.mem_free":10240}]}"#
        );
    }

    #[test]
    fn publish_attributes_builds_the_gateway_frame() {
        let mut handler = RecordingHandler::default();
        let mut gateway = connected_gateway(MockTransport::new(), &mut handler);
        block_on(gateway.publish_attributes(&[("fw.version", Value::Str("1.2.3"))])).unwrap();
        let published = gateway.transport().published.last().unwrap();
        assert_eq!(published.0, "v1/gateway/attributes");
        assert_eq!(published.1, br#"{"A":{"fw.version":"1.2.3"}}"#);
    }

    #[test]
    fn publishing_while_disconnected_fails_fast() {
        let mut handler = RecordingHandler::default();
        let mut gateway =
            TestGateway::new(MockTransport::new(), options_for_test(), &mut handler);
        let err = block_on(gateway.publish_telemetry(&[("t", Value::Int(1))]));
        assert!(matches!(err, Err(GatewayError::NotConnected)));
        assert!(gateway.transport().published.is_empty());
    }

    #[test]
    fn device_connect_pins_the_identity() {
        let mut handler = RecordingHandler::default();
        let mut gateway = connected_gateway(MockTransport::new(), &mut handler);
        assert_eq!(gateway.device_name(), Some("A"));

        // Same name re-announces.
        block_on(gateway.device_connect("A")).unwrap();
        let announces = gateway
            .transport()
            .published
            .iter()
            .filter(|(t, _)| t == "v1/gateway/connect")
            .count();
        assert_eq!(announces, 2);
        let published = gateway.transport().published.last().unwrap();
        assert_eq!(published.1, br#"{"device":"A"}"#);

        // A different name is rejected.
        let err = block_on(gateway.device_connect("B"));
        assert!(matches!(err, Err(GatewayError::DeviceMismatch)));
    }

    #[test]
    fn device_connect_requires_a_connection_and_a_valid_name() {
        let mut handler = RecordingHandler::default();
        let mut gateway =
            TestGateway::new(MockTransport::new(), options_for_test(), &mut handler);
        let err = block_on(gateway.device_connect("A"));
        assert!(matches!(err, Err(GatewayError::NotConnected)));

        block_on(gateway.connect()).unwrap();
        let err = block_on(gateway.device_connect("a/b"));
        assert!(matches!(
            err,
            Err(GatewayError::Encode(EncodeError::InvalidDeviceName))
        ));
    }

    #[test]
    fn device_disconnect_publishes_the_retire_frame() {
        let mut handler = RecordingHandler::default();
        let mut gateway = connected_gateway(MockTransport::new(), &mut handler);
        block_on(gateway.device_disconnect()).unwrap();
        let published = gateway.transport().published.last().unwrap();
        assert_eq!(published.0, "v1/gateway/disconnect");
        assert_eq!(published.1, br#"{"device":"A"}"#);
    }

    #[test]
    fn subscribing_requires_a_device() {
        let mut handler = RecordingHandler::default();
        let mut gateway =
            TestGateway::new(MockTransport::new(), options_for_test(), &mut handler);
        block_on(gateway.connect()).unwrap();
        let err = block_on(gateway.subscribe_to_rpcs());
        assert!(matches!(err, Err(GatewayError::NoDevice)));
    }

    #[test]
    fn malformed_payload_is_counted_and_swallowed() {
        let mut handler = RecordingHandler::default();
        {
            let mut transport = MockTransport::new();
            transport.push_inbound("v1/gateway/rpc/request/A", b"{\"rpc_id\": ");
            let mut gateway = connected_gateway(transport, &mut handler);
            assert_eq!(gateway.decode_error_count(), 0);
            block_on(gateway.poll());
            assert_eq!(gateway.decode_error_count(), 1);
            assert_eq!(gateway.state(), ConnectionState::Connected);
            assert_eq!(gateway.pending_rpcs(), 0);
        }
        assert!(handler.rpcs.is_empty());
        assert!(handler.messages.is_empty());
    }

    #[test]
    fn malformed_topic_is_rejected_before_any_callback() {
        let mut handler = RecordingHandler::default();
        {
            let mut transport = MockTransport::new();
            transport.push_inbound("v2/other/topic", b"x");
            let mut gateway = connected_gateway(transport, &mut handler);
            block_on(gateway.poll());
            assert_eq!(gateway.decode_error_count(), 1);
        }
        assert!(handler.messages.is_empty());
        assert!(handler.rpcs.is_empty());
    }

    #[test]
    fn non_rpc_traffic_reaches_on_message_raw() {
        let mut handler = RecordingHandler::default();
        {
            let mut transport = MockTransport::new();
            transport.push_inbound("v1/gateway/attributes", b"{\"B\":{}}");
            // RPC for some other device is not ours to correlate.
            transport.push_inbound("v1/gateway/rpc/request/B", b"{}");
            let mut gateway = connected_gateway(transport, &mut handler);
            block_on(gateway.poll());
            block_on(gateway.poll());
            assert_eq!(gateway.decode_error_count(), 0);
            assert_eq!(gateway.pending_rpcs(), 0);
        }
        assert_eq!(handler.messages.len(), 2);
        assert_eq!(handler.messages[0].0, "v1/gateway/attributes");
        assert_eq!(handler.messages[1].0, "v1/gateway/rpc/request/B");
        assert!(handler.rpcs.is_empty());
    }

    #[test]
    fn link_loss_during_poll_reconnects_and_resubscribes_once() {
        let mut handler = RecordingHandler::default();
        {
            let mut transport = MockTransport::new();
            transport.poll_errors = 1;
            let mut gateway = connected_gateway(transport, &mut handler);
            assert_eq!(gateway.transport().subscribes.len(), 1);

            block_on(gateway.poll());
            assert_eq!(gateway.state(), ConnectionState::Reconnecting);

            // Publishing in the gap fails fast and the cycle is skipped.
            let err = block_on(gateway.publish_telemetry(&[("t", Value::Int(1))]));
            assert!(matches!(err, Err(GatewayError::NotConnected)));

            std::thread::sleep(core::time::Duration::from_millis(30));
            block_on(gateway.poll());
            assert_eq!(gateway.state(), ConnectionState::Connected);
            assert_eq!(gateway.transport().subscribes.len(), 2);
        }
        assert_eq!(handler.connects, 2);
        assert_eq!(handler.disconnects, 1);
    }

    #[test]
    fn unsubscribe_from_rpcs_releases_the_filter() {
        let mut handler = RecordingHandler::default();
        {
            let mut gateway = connected_gateway(MockTransport::new(), &mut handler);
            block_on(gateway.unsubscribe_from_rpcs()).unwrap();
            assert_eq!(
                gateway.transport().unsubscribes,
                std::vec![std::string::String::from("v1/gateway/rpc/request/A")]
            );
            // Removing again is a quiet no-op.
            block_on(gateway.unsubscribe_from_rpcs()).unwrap();
            assert_eq!(gateway.transport().unsubscribes.len(), 1);
        }
        assert_eq!(handler.unsubscriptions.len(), 1);
    }

    #[test]
    fn poll_outside_a_session_is_a_no_op() {
        let mut handler = RecordingHandler::default();
        let mut gateway =
            TestGateway::new(MockTransport::new(), options_for_test(), &mut handler);
        block_on(gateway.poll());
        assert_eq!(gateway.state(), ConnectionState::Disconnected);
    }
}
