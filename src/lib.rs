//! # AMF3 Codec
//!
//! An encoder/decoder for AMF3 (Action Message Format 3), the compact,
//! self-describing binary format Flash-era clients and servers use to carry
//! structured application messages.
//!
//! ## Features
//! - Every AMF3 value type: undefined, null, booleans, 29-bit integers,
//!   doubles, strings, dates, mixed arrays, typed/dynamic/externalizable
//!   objects, byte arrays, XML, typed vectors and dictionaries
//! - Full reference tracking: repeated strings and object traits are written
//!   as back-references, and decoding resolves string, object and trait
//!   references
//! - Optional object back-references on the encode side, by structural
//!   identity or a caller-supplied identity token ([`ObjectIdentity`])
//! - Hardened decoding: truncated or hostile input yields an error, never a
//!   panic; nesting depth and reference expansion are bounded ([`DecodeOptions`])
//! - serde support: [`to_vec`] / [`from_slice`] for any `Serialize` /
//!   `Deserialize` type, and [`Typed`] for class-aliased objects
//!
//! ## Scope
//! The codec handles the payload only. Message envelopes, compression and
//! transport belong to the caller.
//!
//! Each top-level [`decode`] or [`encode`] call owns a fresh set of reference
//! tables, so the codec holds no state between calls and independent calls
//! may run on any number of threads.
//!
//! ## Example
//! ```rust
//! use amf3_codec::{Array, Value, decode, encode};
//!
//! let value = Value::Array(Array::dense(vec![
//!     Value::Int(5),
//!     Value::Str("hello".to_string()),
//!     Value::Str("hello".to_string()),
//! ]));
//!
//! let bytes = encode(&value).unwrap();
//! // the second "hello" is a one-byte string reference
//! assert_eq!(bytes, [0x09, 0x07, 0x01, 0x04, 0x05, 0x06, 0x0b, b'h', b'e', b'l', b'l', b'o', 0x06, 0x00]);
//! assert_eq!(decode(&bytes).unwrap(), value);
//! ```

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

mod cursor;
mod de;
mod decode;
mod encode;
mod refs;
mod ser;
pub mod typed;
pub mod u29;
pub mod value;

pub use decode::{DecodeOptions, Decoder};
pub use encode::{EncodeOptions, Encoder, IdentityFn, ObjectIdentity};
pub use refs::TableKind;
pub use ser::ValueSerializer;
pub use typed::Typed;
pub use value::{Array, Dictionary, Map, Object, Value, Vector, VectorKind};

// AMF3 type markers
const UNDEFINED_MARKER: u8 = 0x00;
const NULL_MARKER: u8 = 0x01;
const FALSE_MARKER: u8 = 0x02;
const TRUE_MARKER: u8 = 0x03;
const INTEGER_MARKER: u8 = 0x04;
const DOUBLE_MARKER: u8 = 0x05;
const STRING_MARKER: u8 = 0x06;
const XML_DOC_MARKER: u8 = 0x07;
const DATE_MARKER: u8 = 0x08;
const ARRAY_MARKER: u8 = 0x09;
const OBJECT_MARKER: u8 = 0x0a;
const XML_MARKER: u8 = 0x0b;
const BYTE_ARRAY_MARKER: u8 = 0x0c;
const VECTOR_INT_MARKER: u8 = 0x0d;
const VECTOR_UINT_MARKER: u8 = 0x0e;
const VECTOR_DOUBLE_MARKER: u8 = 0x0f;
const VECTOR_OBJECT_MARKER: u8 = 0x10;
const DICTIONARY_MARKER: u8 = 0x11;

/// Errors produced while decoding or encoding AMF3.
#[derive(Debug, Error)]
pub enum Amf3Error {
    /// Writer failure while encoding.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Input ended in the middle of a field.
    #[error("truncated input at offset {offset}: need {need} bytes, {remaining} remaining")]
    TruncatedInput {
        /// Byte offset where the read was attempted.
        offset: usize,
        /// Bytes the field needed.
        need: usize,
        /// Bytes that were left.
        remaining: usize,
    },
    /// Unrecognised type marker.
    #[error("unknown type marker 0x{marker:02x} at offset {offset}")]
    UnknownType { marker: u8, offset: usize },
    /// Reference index at or past the current size of its table.
    #[error("{table} reference {index} out of range (table holds {len})")]
    BadReference { table: TableKind, index: u32, len: usize },
    /// Reference to a value that is still being decoded.
    #[error("object reference {index} points at an enclosing value")]
    CyclicReference { index: u32 },
    /// A trait or member list names the same member twice.
    #[error("duplicate member name {name:?} at offset {offset}")]
    DuplicateMember { name: String, offset: usize },
    /// String bytes are not valid UTF-8.
    #[error("invalid UTF-8 at offset {offset}")]
    MalformedUtf8 { offset: usize },
    /// The value has no AMF3 wire representation.
    #[error("unsupported value: {0}")]
    UnsupportedValue(String),
    /// Containers nested deeper than [`DecodeOptions::max_depth`].
    #[error("nesting deeper than {limit} at offset {offset}")]
    DepthLimitExceeded { limit: usize, offset: usize },
    /// More values than [`DecodeOptions::max_values`], counting reference copies.
    #[error("decoded value count exceeded limit {limit}")]
    ValueLimitExceeded { limit: usize },
    /// Input continues after the decoded value.
    #[error("{remaining} trailing bytes at offset {offset}")]
    TrailingBytes { offset: usize, remaining: usize },
    /// Error raised by a serde `Serialize` / `Deserialize` implementation.
    #[error("Serde error: {0}")]
    Serde(String),
}

impl serde::ser::Error for Amf3Error {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Amf3Error::Serde(msg.to_string())
    }
}

impl serde::de::Error for Amf3Error {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Amf3Error::Serde(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Amf3Error>;

pub mod error {
    pub use super::Amf3Error as Error;
}

/// Decode exactly one value from `bytes`.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    decode_with(bytes, &DecodeOptions::default())
}

/// Decode one value with explicit limits.
pub fn decode_with(bytes: &[u8], options: &DecodeOptions) -> Result<Value> {
    tracing::trace!(len = bytes.len(), "decoding amf3 value");
    let mut decoder = Decoder::with_options(bytes, options.clone());
    let value = decoder.decode_value()?;
    if !options.allow_trailing_bytes && !decoder.is_empty() {
        let err = Amf3Error::TrailingBytes {
            offset: decoder.position(),
            remaining: decoder.remaining(),
        };
        tracing::debug!(error = %err, "amf3 decode rejected");
        return Err(err);
    }
    Ok(value)
}

/// Decode back-to-back values until the input is exhausted.
///
/// Each value is an independent top-level decode with its own tables.
pub fn decode_all(bytes: &[u8]) -> Result<Vec<Value>> {
    let mut decoder = Decoder::new(bytes);
    let mut values = Vec::new();
    while !decoder.is_empty() {
        values.push(decoder.decode_value()?);
    }
    Ok(values)
}

/// Encode one value.
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    encode_with(value, &EncodeOptions::default())
}

/// Encode one value with explicit options.
pub fn encode_with(value: &Value, options: &EncodeOptions) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut encoder = Encoder::with_options(&mut buf, options.clone());
    if let Err(err) = encoder.encode(value) {
        tracing::debug!(error = %err, "amf3 encode failed");
        return Err(err);
    }
    tracing::trace!(len = buf.len(), "encoded amf3 value");
    Ok(buf)
}

// Convenience functions
pub fn to_value<T: ?Sized + Serialize>(value: &T) -> Result<Value> {
    value.serialize(ValueSerializer)
}

pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    T::deserialize(value)
}

pub fn to_vec<T: ?Sized + Serialize>(value: &T) -> Result<Vec<u8>> {
    encode(&to_value(value)?)
}

pub fn from_slice<T: DeserializeOwned>(slice: &[u8]) -> Result<T> {
    from_value(decode(slice)?)
}
