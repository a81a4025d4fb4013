//! # Error Types
//!
//! This module defines the error types used throughout the gateway library,
//! from transport failures surfaced on the publish path to codec errors for
//! malformed topics and payloads.

use crate::transport;

/// The primary error enum for the gateway.
///
/// It is generic over the transport error type `T`, allowing it to wrap
/// specific errors from the underlying MQTT session transport.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GatewayError<T> {
    /// An error occurred at the transport boundary.
    Transport(T),
    /// The operation requires a live broker connection.
    NotConnected,
    /// An inbound topic or payload did not match the wire grammar.
    Decode(DecodeError),
    /// An outbound frame could not be built.
    Encode(EncodeError),
    /// An RPC response was submitted for an id that is not pending.
    UnknownRpc,
    /// The bounded connect handshake expired.
    Timeout,
    /// The operation requires a device identity, but `device_connect` has not
    /// been called yet.
    NoDevice,
    /// `device_connect` was called with a name different from the one already
    /// pinned for this session.
    DeviceMismatch,
}

/// Implements the `From` trait to allow for automatic conversion of any
/// transport error into a `GatewayError`. This is what allows the `?` operator
/// to work seamlessly on `Result`s from the transport layer.
impl<T: transport::TransportError> From<T> for GatewayError<T> {
    fn from(err: T) -> Self {
        GatewayError::Transport(err)
    }
}

/// Errors raised while decoding an inbound topic or payload.
///
/// Decode failure is total: a frame that fails to decode never yields a
/// partially-populated result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// The topic string does not match the gateway topic grammar.
    Topic,
    /// The payload is not valid UTF-8.
    Utf8,
    /// The payload is not well-formed JSON.
    Syntax,
    /// A borrowed string contains an escape sequence, which cannot be
    /// materialized without allocation.
    UnsupportedEscape,
    /// A value has a type the flat payload schema does not allow.
    UnexpectedType,
    /// A required field is absent from the frame.
    MissingField,
    /// The frame holds more entries than the bounded tables accept.
    Capacity,
}

/// Errors raised while building an outbound frame or topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncodeError {
    /// The buffer provided for the operation was too small.
    BufferTooSmall,
    /// NaN and infinities have no JSON representation.
    NonFiniteNumber,
    /// The device name is empty or contains a topic-reserved character.
    InvalidDeviceName,
    /// The data exceeds a bounded table capacity.
    Capacity,
}
