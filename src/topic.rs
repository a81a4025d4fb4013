//! # Gateway Topic Codec
//!
//! Pure mapping between [`GatewayTopic`] values and MQTT topic strings.
//! Encoding is plain string formatting; decoding rejects anything that does
//! not match the topic grammar instead of guessing at partial matches.
//!
//! Grammar (the `v1/gateway` prefix is the broker-facing contract):
//!
//! - `v1/gateway/telemetry`: telemetry publish
//! - `v1/gateway/attributes`: attributes publish
//! - `v1/gateway/connect` / `v1/gateway/disconnect`: device announce/retire
//! - `v1/gateway/rpc/request/<device>`: RPC request (subscribed)
//! - `v1/gateway/rpc/response/<device>`: RPC response (published)

use heapless::String;

use crate::error::{DecodeError, EncodeError};

/// Maximum length for a single topic string.
pub const MAX_TOPIC_LEN: usize = 128;

/// Fixed cloud-ingest topic for telemetry frames.
pub const TELEMETRY_TOPIC: &str = "v1/gateway/telemetry";
/// Fixed cloud-ingest topic for attribute frames.
pub const ATTRIBUTES_TOPIC: &str = "v1/gateway/attributes";
/// Fixed topic for device announce frames.
pub const CONNECT_TOPIC: &str = "v1/gateway/connect";
/// Fixed topic for device retire frames.
pub const DISCONNECT_TOPIC: &str = "v1/gateway/disconnect";

const PREFIX: &str = "v1/gateway/";
const RPC_REQUEST_PREFIX: &str = "rpc/request/";
const RPC_RESPONSE_PREFIX: &str = "rpc/response/";

/// A decoded gateway topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GatewayTopic<'a> {
    /// Telemetry publish topic.
    Telemetry,
    /// Attributes publish topic.
    Attributes,
    /// Device announce topic.
    Connect,
    /// Device retire topic.
    Disconnect,
    /// Per-device RPC request topic (subscribed by the gateway).
    RpcRequest { device: &'a str },
    /// Per-device RPC response topic (published by the gateway).
    RpcResponse { device: &'a str },
}

/// Checks that a device name may be embedded in a topic segment.
///
/// Names must be non-empty and must not contain the topic separator or the
/// MQTT wildcard characters.
pub fn valid_device_name(name: &str) -> bool {
    !name.is_empty() && !name.bytes().any(|b| matches!(b, b'/' | b'+' | b'#'))
}

impl<'a> GatewayTopic<'a> {
    /// Renders the topic into an owned bounded string.
    pub fn encode<const N: usize>(&self) -> Result<String<N>, EncodeError> {
        let mut out: String<N> = String::new();
        let push = |out: &mut String<N>, s: &str| {
            out.push_str(s).map_err(|_| EncodeError::BufferTooSmall)
        };
        match self {
            GatewayTopic::Telemetry => push(&mut out, TELEMETRY_TOPIC)?,
            GatewayTopic::Attributes => push(&mut out, ATTRIBUTES_TOPIC)?,
            GatewayTopic::Connect => push(&mut out, CONNECT_TOPIC)?,
            GatewayTopic::Disconnect => push(&mut out, DISCONNECT_TOPIC)?,
            GatewayTopic::RpcRequest { device } => {
                if !valid_device_name(device) {
                    return Err(EncodeError::InvalidDeviceName);
                }
                push(&mut out, PREFIX)?;
                push(&mut out, RPC_REQUEST_PREFIX)?;
                push(&mut out, device)?;
            }
            GatewayTopic::RpcResponse { device } => {
                if !valid_device_name(device) {
                    return Err(EncodeError::InvalidDeviceName);
                }
                push(&mut out, PREFIX)?;
                push(&mut out, RPC_RESPONSE_PREFIX)?;
                push(&mut out, device)?;
            }
        }
        Ok(out)
    }

    /// Parses a topic string, rejecting anything outside the grammar.
    pub fn decode(topic: &'a str) -> Result<Self, DecodeError> {
        let rest = topic.strip_prefix(PREFIX).ok_or(DecodeError::Topic)?;
        match rest {
            "telemetry" => Ok(GatewayTopic::Telemetry),
            "attributes" => Ok(GatewayTopic::Attributes),
            "connect" => Ok(GatewayTopic::Connect),
            "disconnect" => Ok(GatewayTopic::Disconnect),
            _ => {
                if let Some(device) = rest.strip_prefix(RPC_REQUEST_PREFIX) {
                    if valid_device_name(device) {
                        return Ok(GatewayTopic::RpcRequest { device });
                    }
                } else if let Some(device) = rest.strip_prefix(RPC_RESPONSE_PREFIX) {
                    if valid_device_name(device) {
                        return Ok(GatewayTopic::RpcResponse { device });
                    }
                }
                Err(DecodeError::Topic)
            }
        }
    }
}
