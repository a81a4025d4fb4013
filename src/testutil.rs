//! Test doubles shared by the unit tests: a scriptable mock transport and a
//! handler that records every callback.

use std::collections::VecDeque;
use std::string::{String, ToString};
use std::vec::Vec;

use embassy_time::Duration;

use crate::connection::GatewayOptions;
use crate::handler::GatewayHandler;
use crate::payload::{Fields, Value};
use crate::transport::{Credentials, GatewayTransport, InboundMessage, QoS, TransportError};

/// Session options with timing small enough for test sleeps.
pub fn options_for_test() -> GatewayOptions<'static> {
    let mut options = GatewayOptions::new("broker.test", 1883, "test-token");
    options.connect_timeout = Duration::from_secs(1);
    options.poll_timeout = Duration::from_millis(10);
    options.reconnect_min = Duration::from_millis(10);
    options.reconnect_max = Duration::from_millis(40);
    options
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockError;

impl TransportError for MockError {}

/// A scriptable in-memory transport.
///
/// Counters script the next N failures of each operation; successful calls
/// are recorded for assertions.
#[derive(Debug, Default)]
pub struct MockTransport {
    pub connected: bool,
    pub connect_calls: u32,
    pub fail_connects: u32,
    pub hang_connect: bool,
    pub fail_subscribes: u32,
    pub fail_publishes: u32,
    pub poll_errors: u32,
    pub subscribes: Vec<String>,
    pub unsubscribes: Vec<String>,
    pub published: Vec<(String, Vec<u8>)>,
    inbound: VecDeque<(String, Vec<u8>)>,
    current: Option<(String, Vec<u8>)>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a message for a later `poll`.
    pub fn push_inbound(&mut self, topic: &str, payload: &[u8]) {
        self.inbound.push_back((topic.to_string(), payload.to_vec()));
    }
}

impl GatewayTransport for MockTransport {
    type Error = MockError;

    async fn connect(
        &mut self,
        _host: &str,
        _port: u16,
        _credentials: &Credentials<'_>,
    ) -> Result<(), MockError> {
        self.connect_calls += 1;
        if self.hang_connect {
            core::future::pending::<()>().await;
        }
        if self.fail_connects > 0 {
            self.fail_connects -= 1;
            return Err(MockError);
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), MockError> {
        self.connected = false;
        Ok(())
    }

    async fn subscribe(&mut self, filter: &str) -> Result<(), MockError> {
        if self.fail_subscribes > 0 {
            self.fail_subscribes -= 1;
            return Err(MockError);
        }
        self.subscribes.push(filter.to_string());
        Ok(())
    }

    async fn unsubscribe(&mut self, filter: &str) -> Result<(), MockError> {
        self.unsubscribes.push(filter.to_string());
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        _qos: QoS,
    ) -> Result<(), MockError> {
        if self.fail_publishes > 0 {
            self.fail_publishes -= 1;
            return Err(MockError);
        }
        self.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn poll(
        &mut self,
        _timeout: Duration,
    ) -> Result<Option<InboundMessage<'_>>, MockError> {
        if self.poll_errors > 0 {
            self.poll_errors -= 1;
            return Err(MockError);
        }
        self.current = self.inbound.pop_front();
        Ok(self
            .current
            .as_ref()
            .map(|(topic, payload)| InboundMessage {
                topic: topic.as_str(),
                payload: payload.as_slice(),
            }))
    }
}

/// An owned snapshot of a payload value, for assertions after borrows end.
#[derive(Debug, Clone, PartialEq)]
pub enum OwnedValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<&Value<'_>> for OwnedValue {
    fn from(value: &Value<'_>) -> Self {
        match value {
            Value::Bool(b) => OwnedValue::Bool(*b),
            Value::Int(i) => OwnedValue::Int(*i),
            Value::Float(f) => OwnedValue::Float(*f),
            Value::Str(s) => OwnedValue::Str((*s).to_string()),
        }
    }
}

/// One recorded `on_rpc` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRpc {
    pub device: String,
    pub rpc_id: u32,
    pub method: String,
    pub params: Vec<(String, OwnedValue)>,
}

/// A handler that records every callback it receives.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    pub connects: u32,
    pub disconnects: u32,
    pub subscriptions: Vec<String>,
    pub unsubscriptions: Vec<String>,
    pub messages: Vec<(String, Vec<u8>)>,
    pub rpcs: Vec<RecordedRpc>,
}

impl GatewayHandler for RecordingHandler {
    fn on_connect(&mut self) {
        self.connects += 1;
    }

    fn on_disconnect(&mut self) {
        self.disconnects += 1;
    }

    fn on_subscribe(&mut self, topic: &str, _granted: QoS) {
        self.subscriptions.push(topic.to_string());
    }

    fn on_unsubscribe(&mut self, topic: &str) {
        self.unsubscriptions.push(topic.to_string());
    }

    fn on_message(&mut self, topic: &str, payload: &[u8]) {
        self.messages.push((topic.to_string(), payload.to_vec()));
    }

    fn on_rpc(&mut self, device: &str, rpc_id: u32, method: &str, params: &Fields<'_>) {
        self.rpcs.push(RecordedRpc {
            device: device.to_string(),
            rpc_id,
            method: method.to_string(),
            params: params
                .iter()
                .map(|(key, value)| (key.to_string(), value.into()))
                .collect(),
        });
    }
}
