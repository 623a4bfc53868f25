//! Binary RPC message codec.
//!
//! Messages follow the strict binary protocol layout:
//!
//! ```text
//! message  := i32 (0x8001_0000 | type) · string name · i32 seq_id · struct
//! struct   := (u8 field_type · i16 field_id · value)* · u8 STOP
//! string   := i32 len · bytes
//! map      := u8 key_type · u8 value_type · i32 size · (key · value)*
//! list/set := u8 elem_type · i32 size · elem*
//! ```
//!
//! A call carries the args struct `{1: WireRequest}`; a reply carries the
//! result struct `{0: WireResponse}`; an exception carries
//! `{1: message, 2: kind}`. Unknown fields are skipped on read.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::api::{ApiResponse, ApiStatus, Method, Protocol, Reply, Request};
use crate::error::TransportError;

/// The single service method both sides speak.
pub const METHOD_NAME: &str = "call";

const VERSION_1: u32 = 0x8001_0000;
const VERSION_MASK: u32 = 0xffff_0000;
const MAX_SKIP_DEPTH: usize = 32;

pub mod field_type {
    pub const STOP: u8 = 0;
    pub const BOOL: u8 = 2;
    pub const BYTE: u8 = 3;
    pub const DOUBLE: u8 = 4;
    pub const I16: u8 = 6;
    pub const I32: u8 = 8;
    pub const I64: u8 = 10;
    pub const STRING: u8 = 11;
    pub const STRUCT: u8 = 12;
    pub const MAP: u8 = 13;
    pub const SET: u8 = 14;
    pub const LIST: u8 = 15;
}

/// Application exception kinds.
pub mod exception_kind {
    pub const UNKNOWN_METHOD: i32 = 1;
    pub const INVALID_MESSAGE_TYPE: i32 = 2;
    pub const INTERNAL_ERROR: i32 = 6;
    pub const PROTOCOL_ERROR: i32 = 7;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call,
    Reply,
    Exception,
    Oneway,
}

impl MessageType {
    fn as_u8(self) -> u8 {
        match self {
            MessageType::Call => 1,
            MessageType::Reply => 2,
            MessageType::Exception => 3,
            MessageType::Oneway => 4,
        }
    }

    fn from_u8(v: u8) -> Result<Self, TransportError> {
        match v {
            1 => Ok(MessageType::Call),
            2 => Ok(MessageType::Reply),
            3 => Ok(MessageType::Exception),
            4 => Ok(MessageType::Oneway),
            other => Err(TransportError::Codec(format!("unknown message type {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub name: String,
    pub kind: MessageType,
    pub seq_id: i32,
}

/// Request struct on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireRequest {
    pub path: String,
    pub params: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub method: String,
    pub content: String,
}

/// Response struct on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireResponse {
    pub status: i32,
    pub message: String,
    /// JSON text of the data array, empty when there is none.
    pub content: String,
    pub total: Option<i64>,
    pub error_code: Option<String>,
    pub headers: HashMap<String, String>,
}

// --- Conversions ---

impl WireRequest {
    pub fn from_request(req: &Request) -> Self {
        Self {
            path: req.path().to_string(),
            params: req.params().clone(),
            headers: req.headers().clone(),
            method: req.method().as_str().to_string(),
            content: req.content_text().to_string(),
        }
    }

    pub fn into_request(self) -> Request {
        Request::new(Method::from(self.method.as_str()), self.path)
            .with_protocol(Protocol::Binary)
            .with_params(self.params)
            .with_headers(self.headers)
            .with_body(self.content)
    }
}

impl WireResponse {
    pub fn from_reply(reply: Reply) -> Self {
        let body = reply.body;
        let content = body
            .data
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default();
        Self {
            status: i32::from(reply.status_code),
            message: body.message,
            content,
            total: body.total,
            error_code: body.error_code,
            headers: reply.headers.into_iter().collect(),
        }
    }

    /// Envelope sent without going through a responder.
    pub fn from_api_response(resp: ApiResponse) -> Self {
        Self::from_reply(Reply {
            status_code: resp.status.code(),
            headers: Default::default(),
            body: resp,
        })
    }

    pub fn into_api_response(self) -> Result<ApiResponse, serde_json::Error> {
        let data = match self.content.trim() {
            "" | "null" => None,
            text => Some(serde_json::from_str(text)?),
        };
        Ok(ApiResponse {
            status: ApiStatus::from_code(self.status),
            data,
            message: self.message,
            error_code: self.error_code,
            total: self.total,
            headers: if self.headers.is_empty() {
                None
            } else {
                Some(self.headers.into_iter().collect())
            },
        })
    }
}

// --- Encoding ---

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_i32(s.len() as i32);
    buf.put_slice(s.as_bytes());
}

fn put_field(buf: &mut BytesMut, kind: u8, id: i16) {
    buf.put_u8(kind);
    buf.put_i16(id);
}

fn put_string_map(buf: &mut BytesMut, map: &HashMap<String, String>) {
    buf.put_u8(field_type::STRING);
    buf.put_u8(field_type::STRING);
    buf.put_i32(map.len() as i32);
    for (k, v) in map {
        put_string(buf, k);
        put_string(buf, v);
    }
}

fn put_message_begin(buf: &mut BytesMut, name: &str, kind: MessageType, seq_id: i32) {
    buf.put_u32(VERSION_1 | u32::from(kind.as_u8()));
    put_string(buf, name);
    buf.put_i32(seq_id);
}

fn put_request(buf: &mut BytesMut, req: &WireRequest) {
    put_field(buf, field_type::STRING, 1);
    put_string(buf, &req.path);
    put_field(buf, field_type::MAP, 2);
    put_string_map(buf, &req.params);
    put_field(buf, field_type::MAP, 3);
    put_string_map(buf, &req.headers);
    put_field(buf, field_type::STRING, 4);
    put_string(buf, &req.method);
    put_field(buf, field_type::STRING, 5);
    put_string(buf, &req.content);
    buf.put_u8(field_type::STOP);
}

fn put_response(buf: &mut BytesMut, resp: &WireResponse) {
    put_field(buf, field_type::I32, 1);
    buf.put_i32(resp.status);
    put_field(buf, field_type::STRING, 2);
    put_string(buf, &resp.message);
    put_field(buf, field_type::STRING, 3);
    put_string(buf, &resp.content);
    if let Some(total) = resp.total {
        put_field(buf, field_type::I64, 4);
        buf.put_i64(total);
    }
    if let Some(code) = &resp.error_code {
        put_field(buf, field_type::STRING, 5);
        put_string(buf, code);
    }
    if !resp.headers.is_empty() {
        put_field(buf, field_type::MAP, 6);
        put_string_map(buf, &resp.headers);
    }
    buf.put_u8(field_type::STOP);
}

/// Encode a call message carrying `req`.
pub fn encode_call(seq_id: i32, req: &WireRequest) -> Bytes {
    let mut buf = BytesMut::with_capacity(128 + req.content.len());
    put_message_begin(&mut buf, METHOD_NAME, MessageType::Call, seq_id);
    put_field(&mut buf, field_type::STRUCT, 1);
    put_request(&mut buf, req);
    buf.put_u8(field_type::STOP);
    buf.freeze()
}

/// Encode a reply message carrying `resp`.
pub fn encode_reply(seq_id: i32, resp: &WireResponse) -> Bytes {
    let mut buf = BytesMut::with_capacity(128 + resp.content.len());
    put_message_begin(&mut buf, METHOD_NAME, MessageType::Reply, seq_id);
    put_field(&mut buf, field_type::STRUCT, 0);
    put_response(&mut buf, resp);
    buf.put_u8(field_type::STOP);
    buf.freeze()
}

/// Encode an application exception.
pub fn encode_exception(name: &str, seq_id: i32, message: &str, kind: i32) -> Bytes {
    let mut buf = BytesMut::with_capacity(64 + message.len());
    put_message_begin(&mut buf, name, MessageType::Exception, seq_id);
    put_field(&mut buf, field_type::STRING, 1);
    put_string(&mut buf, message);
    put_field(&mut buf, field_type::I32, 2);
    buf.put_i32(kind);
    buf.put_u8(field_type::STOP);
    buf.freeze()
}

// --- Decoding ---

/// Bounds-checked reader over a frame payload.
pub struct Reader {
    buf: Bytes,
}

fn truncated() -> TransportError {
    TransportError::Codec("truncated message".to_string())
}

impl Reader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize) -> Result<(), TransportError> {
        if self.buf.remaining() < n {
            return Err(truncated());
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8, TransportError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn i16(&mut self) -> Result<i16, TransportError> {
        self.need(2)?;
        Ok(self.buf.get_i16())
    }

    fn i32(&mut self) -> Result<i32, TransportError> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    fn i64(&mut self) -> Result<i64, TransportError> {
        self.need(8)?;
        Ok(self.buf.get_i64())
    }

    fn size(&mut self) -> Result<usize, TransportError> {
        let n = self.i32()?;
        usize::try_from(n).map_err(|_| TransportError::Codec(format!("negative size {}", n)))
    }

    fn bytes(&mut self, n: usize) -> Result<Bytes, TransportError> {
        self.need(n)?;
        Ok(self.buf.split_to(n))
    }

    fn string(&mut self) -> Result<String, TransportError> {
        let len = self.size()?;
        let raw = self.bytes(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| TransportError::Codec(format!("invalid utf-8 string: {}", e)))
    }

    /// Field header, or `None` at STOP.
    fn field(&mut self) -> Result<Option<(u8, i16)>, TransportError> {
        let kind = self.u8()?;
        if kind == field_type::STOP {
            return Ok(None);
        }
        Ok(Some((kind, self.i16()?)))
    }

    fn string_map(&mut self) -> Result<HashMap<String, String>, TransportError> {
        let key_type = self.u8()?;
        let value_type = self.u8()?;
        let size = self.size()?;
        if key_type != field_type::STRING || value_type != field_type::STRING {
            return Err(TransportError::Codec(format!(
                "expected map<string,string>, got map<{},{}>",
                key_type, value_type
            )));
        }
        let mut map = HashMap::with_capacity(size.min(1024));
        for _ in 0..size {
            let k = self.string()?;
            let v = self.string()?;
            map.insert(k, v);
        }
        Ok(map)
    }

    fn skip(&mut self, kind: u8, depth: usize) -> Result<(), TransportError> {
        if depth > MAX_SKIP_DEPTH {
            return Err(TransportError::Codec("nesting too deep".to_string()));
        }
        match kind {
            field_type::BOOL | field_type::BYTE => {
                self.bytes(1)?;
            }
            field_type::I16 => {
                self.bytes(2)?;
            }
            field_type::I32 => {
                self.bytes(4)?;
            }
            field_type::DOUBLE | field_type::I64 => {
                self.bytes(8)?;
            }
            field_type::STRING => {
                let len = self.size()?;
                self.bytes(len)?;
            }
            field_type::STRUCT => {
                while let Some((k, _)) = self.field()? {
                    self.skip(k, depth + 1)?;
                }
            }
            field_type::MAP => {
                let key_type = self.u8()?;
                let value_type = self.u8()?;
                for _ in 0..self.size()? {
                    self.skip(key_type, depth + 1)?;
                    self.skip(value_type, depth + 1)?;
                }
            }
            field_type::SET | field_type::LIST => {
                let elem_type = self.u8()?;
                for _ in 0..self.size()? {
                    self.skip(elem_type, depth + 1)?;
                }
            }
            other => {
                return Err(TransportError::Codec(format!("unknown field type {}", other)));
            }
        }
        Ok(())
    }

    /// Message header; accepts strict and legacy layouts.
    pub fn message_begin(&mut self) -> Result<MessageHeader, TransportError> {
        let first = self.i32()?;
        if first < 0 {
            let word = first as u32;
            if word & VERSION_MASK != VERSION_1 {
                return Err(TransportError::Codec(format!(
                    "bad protocol version {:#x}",
                    word & VERSION_MASK
                )));
            }
            let kind = MessageType::from_u8((word & 0xff) as u8)?;
            let name = self.string()?;
            let seq_id = self.i32()?;
            Ok(MessageHeader { name, kind, seq_id })
        } else {
            let raw = self.bytes(first as usize)?;
            let name = String::from_utf8(raw.to_vec())
                .map_err(|e| TransportError::Codec(format!("invalid method name: {}", e)))?;
            let kind = MessageType::from_u8(self.u8()?)?;
            let seq_id = self.i32()?;
            Ok(MessageHeader { name, kind, seq_id })
        }
    }

    fn request(&mut self) -> Result<WireRequest, TransportError> {
        let mut req = WireRequest::default();
        while let Some((kind, id)) = self.field()? {
            match (id, kind) {
                (1, field_type::STRING) => req.path = self.string()?,
                (2, field_type::MAP) => req.params = self.string_map()?,
                (3, field_type::MAP) => req.headers = self.string_map()?,
                (4, field_type::STRING) => req.method = self.string()?,
                (5, field_type::STRING) => req.content = self.string()?,
                _ => self.skip(kind, 0)?,
            }
        }
        Ok(req)
    }

    fn response(&mut self) -> Result<WireResponse, TransportError> {
        let mut resp = WireResponse::default();
        while let Some((kind, id)) = self.field()? {
            match (id, kind) {
                (1, field_type::I32) => resp.status = self.i32()?,
                (2, field_type::STRING) => resp.message = self.string()?,
                (3, field_type::STRING) => resp.content = self.string()?,
                (4, field_type::I64) => resp.total = Some(self.i64()?),
                (5, field_type::STRING) => resp.error_code = Some(self.string()?),
                (6, field_type::MAP) => resp.headers = self.string_map()?,
                _ => self.skip(kind, 0)?,
            }
        }
        Ok(resp)
    }

    /// Args struct of a call: `{1: request}`.
    pub fn call_args(&mut self) -> Result<WireRequest, TransportError> {
        let mut found = None;
        while let Some((kind, id)) = self.field()? {
            match (id, kind) {
                (1, field_type::STRUCT) => found = Some(self.request()?),
                _ => self.skip(kind, 0)?,
            }
        }
        found.ok_or_else(|| TransportError::Codec("call without request argument".to_string()))
    }

    /// Result struct of a reply: `{0: success}`.
    pub fn call_result(&mut self) -> Result<WireResponse, TransportError> {
        let mut found = None;
        while let Some((kind, id)) = self.field()? {
            match (id, kind) {
                (0, field_type::STRUCT) => found = Some(self.response()?),
                _ => self.skip(kind, 0)?,
            }
        }
        found.ok_or_else(|| TransportError::Codec("reply without result".to_string()))
    }

    /// Exception struct: `{1: message, 2: kind}`.
    pub fn exception(&mut self) -> Result<(String, i32), TransportError> {
        let mut message = String::new();
        let mut kind_code = 0;
        while let Some((kind, id)) = self.field()? {
            match (id, kind) {
                (1, field_type::STRING) => message = self.string()?,
                (2, field_type::I32) => kind_code = self.i32()?,
                _ => self.skip(kind, 0)?,
            }
        }
        Ok((message, kind_code))
    }
}

/// Decode a reply payload into the response or the remote exception.
pub fn decode_reply(payload: Bytes, expected_seq: i32) -> Result<WireResponse, TransportError> {
    let mut reader = Reader::new(payload);
    let header = reader.message_begin()?;
    if header.seq_id != expected_seq {
        return Err(TransportError::Codec(format!(
            "out of order reply: expected seq {}, got {}",
            expected_seq, header.seq_id
        )));
    }
    match header.kind {
        MessageType::Reply => reader.call_result(),
        MessageType::Exception => {
            let (message, _) = reader.exception()?;
            Err(TransportError::Remote(message))
        }
        other => Err(TransportError::Codec(format!("unexpected message type {:?}", other))),
    }
}
