/// Value <-> transport string conversion.
use std::error::Error as StdError;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Failure while converting a value to or from its transport string.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode value: {0}")]
    Encode(#[source] BoxError),
    #[error("failed to decode value: {0}")]
    Decode(#[source] BoxError),
}

impl CodecError {
    /// Wraps any error (or message) as an encode failure.
    pub fn encode(err: impl Into<BoxError>) -> Self {
        Self::Encode(err.into())
    }

    /// Wraps any error (or message) as a decode failure.
    pub fn decode(err: impl Into<BoxError>) -> Self {
        Self::Decode(err.into())
    }
}

/// Converts history values to and from the strings the backing store holds.
///
/// Encoded forms also decide equality: two values whose encodings match are
/// the same snapshot as far as the history is concerned.
pub trait Codec<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<String, CodecError>;
    fn decode(&self, raw: &str) -> Result<T, CodecError>;
}

/// Whether two values encode to the same string.
///
/// A value that fails to encode never compares equal.
pub(crate) fn same_encoding<T>(codec: &dyn Codec<T>, a: &T, b: &T) -> bool {
    match (codec.encode(a), codec.encode(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Default codec: compact JSON via `serde_json`.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T: Serialize + DeserializeOwned> Codec<T> for JsonCodec<T> {
    fn encode(&self, value: &T) -> Result<String, CodecError> {
        serde_json::to_string(value).map_err(CodecError::encode)
    }

    fn decode(&self, raw: &str) -> Result<T, CodecError> {
        serde_json::from_str(raw).map_err(CodecError::decode)
    }
}

/// Codec built from a pair of plain functions.
///
/// Useful for values that aren't serde types, or for a custom text format.
pub struct FnCodec<T> {
    encode: fn(&T) -> Result<String, CodecError>,
    decode: fn(&str) -> Result<T, CodecError>,
}

impl<T> FnCodec<T> {
    pub fn new(
        encode: fn(&T) -> Result<String, CodecError>,
        decode: fn(&str) -> Result<T, CodecError>,
    ) -> Self {
        Self { encode, decode }
    }
}

impl<T> std::fmt::Debug for FnCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FnCodec")
    }
}

impl<T> Codec<T> for FnCodec<T> {
    fn encode(&self, value: &T) -> Result<String, CodecError> {
        (self.encode)(value)
    }

    fn decode(&self, raw: &str) -> Result<T, CodecError> {
        (self.decode)(raw)
    }
}
