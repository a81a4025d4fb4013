//! # Gateway Payload Codec
//!
//! Frame structures for the gateway's wire JSON and the traits for encoding
//! and decoding them to and from a byte buffer. Decoded frames borrow their
//! strings from the input buffer; encode writes into a caller-provided
//! scratch buffer and reports the number of bytes produced.
//!
//! Wire shapes:
//!
//! - telemetry: `{"<device>": [{"k": v, ...}, ...]}`
//! - attributes: `{"<device>": {"k": v, ...}}`
//! - announce/retire: `{"device": "<name>"}`
//! - RPC request: `{"rpc_id": n, "method": "m", "params": {...}}`
//! - RPC response: `{"rpc_id": n, "result": {...}}`

use heapless::Vec;

use crate::error::{DecodeError, EncodeError};
use crate::json::{JsonReader, Number, SliceWriter};

/// Maximum number of entries in one flat key/value mapping.
pub const MAX_FIELDS: usize = 16;
/// Maximum number of records accepted in one inbound telemetry frame.
pub const MAX_RECORDS: usize = 4;

/// An ordered flat key/value mapping, as carried by every frame body.
pub type Fields<'a> = Vec<(&'a str, Value<'a>), MAX_FIELDS>;

/// A single reading, attribute, parameter or result value.
///
/// The payload schema is flat: values are numbers, strings or booleans.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Value<'a> {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(&'a str),
}

/// JSON has a single number type, so `Int` and `Float` compare numerically.
impl PartialEq for Value<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            _ => false,
        }
    }
}

impl From<bool> for Value<'_> {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value<'_> {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value<'_> {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<u32> for Value<'_> {
    fn from(v: u32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value<'_> {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value<'_> {
    fn from(v: f32) -> Self {
        Value::Float(v.into())
    }
}

impl<'a> From<&'a str> for Value<'a> {
    fn from(v: &'a str) -> Self {
        Value::Str(v)
    }
}

impl Value<'_> {
    fn encode_into(&self, w: &mut SliceWriter<'_>) -> Result<(), EncodeError> {
        match self {
            Value::Bool(b) => w.boolean(*b),
            Value::Int(i) => w.int(*i),
            Value::Float(f) => w.float(*f),
            Value::Str(s) => w.string(s),
        }
    }
}

/// A trait for frames that can be encoded into a byte buffer.
pub trait EncodePayload {
    /// Writes the wire JSON, returning the encoded length.
    fn encode(&self, buf: &mut [u8]) -> Result<usize, EncodeError>;
}

/// A trait for frames that can be decoded from a byte buffer.
pub trait DecodePayload<'a>: Sized {
    /// Parses the wire JSON, borrowing strings from `buf`.
    fn decode(buf: &'a [u8]) -> Result<Self, DecodeError>;
}

fn encode_fields(w: &mut SliceWriter<'_>, fields: &Fields<'_>) -> Result<(), EncodeError> {
    w.raw("{")?;
    for (i, (key, value)) in fields.iter().enumerate() {
        if i > 0 {
            w.raw(",")?;
        }
        w.string(key)?;
        w.raw(":")?;
        value.encode_into(w)?;
    }
    w.raw("}")
}

fn parse_value<'a>(r: &mut JsonReader<'a>) -> Result<Value<'a>, DecodeError> {
    match r.peek() {
        Some(b'"') => Ok(Value::Str(r.string()?)),
        Some(b't' | b'f' | b'n') => match r.keyword()? {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            "null" => Err(DecodeError::UnexpectedType),
            _ => Err(DecodeError::Syntax),
        },
        Some(b'{' | b'[') => Err(DecodeError::UnexpectedType),
        Some(_) => Ok(match r.number()? {
            Number::Int(i) => Value::Int(i),
            Number::Float(f) => Value::Float(f),
        }),
        None => Err(DecodeError::Syntax),
    }
}

fn parse_fields<'a>(r: &mut JsonReader<'a>) -> Result<Fields<'a>, DecodeError> {
    r.expect(b'{')?;
    let mut out = Fields::new();
    if r.eat(b'}') {
        return Ok(out);
    }
    loop {
        let key = r.string()?;
        r.expect(b':')?;
        let value = parse_value(r)?;
        out.push((key, value)).map_err(|_| DecodeError::Capacity)?;
        if r.eat(b',') {
            continue;
        }
        r.expect(b'}')?;
        return Ok(out);
    }
}

fn parse_rpc_id(r: &mut JsonReader<'_>) -> Result<u32, DecodeError> {
    match r.number()? {
        Number::Int(i) => u32::try_from(i).map_err(|_| DecodeError::UnexpectedType),
        Number::Float(_) => Err(DecodeError::UnexpectedType),
    }
}

/// A telemetry frame: one device's ordered sequence of reading records.
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry<'a> {
    pub device: &'a str,
    pub records: Vec<Fields<'a>, MAX_RECORDS>,
}

impl<'a> Telemetry<'a> {
    /// Builds the common single-record frame from a slice of readings.
    pub fn single(device: &'a str, readings: &[(&'a str, Value<'a>)]) -> Result<Self, EncodeError> {
        let fields = Fields::from_slice(readings).map_err(|_| EncodeError::Capacity)?;
        let mut records = Vec::new();
        records.push(fields).map_err(|_| EncodeError::Capacity)?;
        Ok(Self { device, records })
    }
}

impl EncodePayload for Telemetry<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, EncodeError> {
        let mut w = SliceWriter::new(buf);
        w.raw("{")?;
        w.string(self.device)?;
        w.raw(":[")?;
        for (i, record) in self.records.iter().enumerate() {
            if i > 0 {
                w.raw(",")?;
            }
            encode_fields(&mut w, record)?;
        }
        w.raw("]}")?;
        Ok(w.len())
    }
}

impl<'a> DecodePayload<'a> for Telemetry<'a> {
    fn decode(buf: &'a [u8]) -> Result<Self, DecodeError> {
        let mut r = JsonReader::new(buf)?;
        r.expect(b'{')?;
        let device = r.string()?;
        r.expect(b':')?;
        r.expect(b'[')?;
        let mut records = Vec::new();
        if !r.eat(b']') {
            loop {
                records
                    .push(parse_fields(&mut r)?)
                    .map_err(|_| DecodeError::Capacity)?;
                if r.eat(b',') {
                    continue;
                }
                r.expect(b']')?;
                break;
            }
        }
        r.expect(b'}')?;
        r.end()?;
        Ok(Self { device, records })
    }
}

/// An attributes frame: one device's flat attribute mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct Attributes<'a> {
    pub device: &'a str,
    pub fields: Fields<'a>,
}

impl<'a> Attributes<'a> {
    /// Builds the frame from a slice of attribute entries.
    pub fn new(device: &'a str, fields: &[(&'a str, Value<'a>)]) -> Result<Self, EncodeError> {
        let fields = Fields::from_slice(fields).map_err(|_| EncodeError::Capacity)?;
        Ok(Self { device, fields })
    }
}

impl EncodePayload for Attributes<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, EncodeError> {
        let mut w = SliceWriter::new(buf);
        w.raw("{")?;
        w.string(self.device)?;
        w.raw(":")?;
        encode_fields(&mut w, &self.fields)?;
        w.raw("}")?;
        Ok(w.len())
    }
}

impl<'a> DecodePayload<'a> for Attributes<'a> {
    fn decode(buf: &'a [u8]) -> Result<Self, DecodeError> {
        let mut r = JsonReader::new(buf)?;
        r.expect(b'{')?;
        let device = r.string()?;
        r.expect(b':')?;
        let fields = parse_fields(&mut r)?;
        r.expect(b'}')?;
        r.end()?;
        Ok(Self { device, fields })
    }
}

/// A device announce frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConnect<'a> {
    pub device: &'a str,
}

/// A device retire frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDisconnect<'a> {
    pub device: &'a str,
}

fn encode_device_frame(device: &str, buf: &mut [u8]) -> Result<usize, EncodeError> {
    let mut w = SliceWriter::new(buf);
    w.raw("{\"device\":")?;
    w.string(device)?;
    w.raw("}")?;
    Ok(w.len())
}

fn decode_device_frame(buf: &[u8]) -> Result<&str, DecodeError> {
    let mut r = JsonReader::new(buf)?;
    r.expect(b'{')?;
    let mut device = None;
    if !r.eat(b'}') {
        loop {
            let key = r.string()?;
            r.expect(b':')?;
            if key == "device" {
                device = Some(r.string()?);
            } else {
                r.skip_value()?;
            }
            if r.eat(b',') {
                continue;
            }
            r.expect(b'}')?;
            break;
        }
    }
    r.end()?;
    device.ok_or(DecodeError::MissingField)
}

impl EncodePayload for DeviceConnect<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, EncodeError> {
        encode_device_frame(self.device, buf)
    }
}

impl<'a> DecodePayload<'a> for DeviceConnect<'a> {
    fn decode(buf: &'a [u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            device: decode_device_frame(buf)?,
        })
    }
}

impl EncodePayload for DeviceDisconnect<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, EncodeError> {
        encode_device_frame(self.device, buf)
    }
}

impl<'a> DecodePayload<'a> for DeviceDisconnect<'a> {
    fn decode(buf: &'a [u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            device: decode_device_frame(buf)?,
        })
    }
}

/// An inbound RPC invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest<'a> {
    pub id: u32,
    pub method: &'a str,
    pub params: Fields<'a>,
}

impl EncodePayload for RpcRequest<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, EncodeError> {
        let mut w = SliceWriter::new(buf);
        w.raw("{\"rpc_id\":")?;
        w.int(self.id.into())?;
        w.raw(",\"method\":")?;
        w.string(self.method)?;
        w.raw(",\"params\":")?;
        encode_fields(&mut w, &self.params)?;
        w.raw("}")?;
        Ok(w.len())
    }
}

impl<'a> DecodePayload<'a> for RpcRequest<'a> {
    fn decode(buf: &'a [u8]) -> Result<Self, DecodeError> {
        let mut r = JsonReader::new(buf)?;
        r.expect(b'{')?;
        let mut id = None;
        let mut method = None;
        let mut params = None;
        if !r.eat(b'}') {
            loop {
                let key = r.string()?;
                r.expect(b':')?;
                match key {
                    "rpc_id" => id = Some(parse_rpc_id(&mut r)?),
                    "method" => method = Some(r.string()?),
                    "params" => params = Some(parse_fields(&mut r)?),
                    _ => r.skip_value()?,
                }
                if r.eat(b',') {
                    continue;
                }
                r.expect(b'}')?;
                break;
            }
        }
        r.end()?;
        Ok(Self {
            id: id.ok_or(DecodeError::MissingField)?,
            method: method.ok_or(DecodeError::MissingField)?,
            params: params.unwrap_or_default(),
        })
    }
}

/// An outbound RPC response.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse<'a> {
    pub id: u32,
    pub result: Fields<'a>,
}

impl EncodePayload for RpcResponse<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, EncodeError> {
        let mut w = SliceWriter::new(buf);
        w.raw("{\"rpc_id\":")?;
        w.int(self.id.into())?;
        w.raw(",\"result\":")?;
        encode_fields(&mut w, &self.result)?;
        w.raw("}")?;
        Ok(w.len())
    }
}

impl<'a> DecodePayload<'a> for RpcResponse<'a> {
    fn decode(buf: &'a [u8]) -> Result<Self, DecodeError> {
        let mut r = JsonReader::new(buf)?;
        r.expect(b'{')?;
        let mut id = None;
        let mut result = None;
        if !r.eat(b'}') {
            loop {
                let key = r.string()?;
                r.expect(b':')?;
                match key {
                    "rpc_id" => id = Some(parse_rpc_id(&mut r)?),
                    "result" => result = Some(parse_fields(&mut r)?),
                    _ => r.skip_value()?,
                }
                if r.eat(b',') {
                    continue;
                }
                r.expect(b'}')?;
                break;
            }
        }
        r.end()?;
        Ok(Self {
            id: id.ok_or(DecodeError::MissingField)?,
            result: result.unwrap_or_default(),
        })
    }
}
