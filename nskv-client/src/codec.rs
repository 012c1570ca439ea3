//! # Object Codec
//!
//! Structured values are stored as the bytes produced by an `ObjectCodec`.
//! The client only moves bytes; the codec owns the format. JSON is the default.

use std::error::Error as StdError;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Byte-oriented encode/decode collaborator for object accessors.
pub trait ObjectCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError>;
    fn decode<T: DeserializeOwned>(&self, raw: &[u8]) -> Result<T, CodecError>;
}

/// JSON via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ObjectCodec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(CodecError::new)
    }

    fn decode<T: DeserializeOwned>(&self, raw: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(raw).map_err(CodecError::new)
    }
}

/// Failure reported by a codec, independent of the format.
#[derive(Debug)]
pub struct CodecError {
    inner: Box<dyn StdError + Send + Sync>,
}

impl CodecError {
    pub fn new(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        CodecError { inner: err.into() }
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl StdError for CodecError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}
