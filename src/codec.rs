//! Payload decoding.

use serde_json::Value;

use crate::Result;
use crate::error::{Error, Kind};
use crate::transport::Payload;

/// Decodes raw payloads into structured data.
///
/// Invoked by the connection manager for every payload a live transport receives. A
/// decode failure is reported to the caller and does not close the transport.
///
/// # Example
///
/// ```ignore
/// pub struct Lines;
///
/// impl MessageCodec for Lines {
///     fn decode(&self, payload: Payload) -> crate::Result<Value> {
///         match payload {
///             Payload::Text(text) => Ok(Value::from(text.lines().collect::<Vec<_>>())),
///             _ => Err(Error::validation("binary payloads are not supported")),
///         }
///     }
/// }
/// ```
pub trait MessageCodec: Send + Sync + 'static {
    fn decode(&self, payload: Payload) -> Result<Value>;
}

/// Inflates compressed payloads and parses the result as JSON.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn decode(&self, payload: Payload) -> Result<Value> {
        match payload {
            Payload::Text(text) => Ok(serde_json::from_str(&text)?),
            Payload::Binary {
                data,
                compressed: false,
            } => Ok(serde_json::from_slice(&data)?),
            Payload::Binary {
                data,
                compressed: true,
            } => Ok(serde_json::from_slice(&inflate(&data)?)?),
        }
    }
}

/// Gzip streams start with these two bytes; anything else is treated as zlib.
#[cfg(feature = "compression")]
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[cfg(feature = "compression")]
fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    use std::io::Read as _;

    use flate2::read::{GzDecoder, ZlibDecoder};

    let mut inflated = Vec::new();
    let read = if data.starts_with(&GZIP_MAGIC) {
        GzDecoder::new(data).read_to_end(&mut inflated)
    } else {
        ZlibDecoder::new(data).read_to_end(&mut inflated)
    };
    read.map_err(|e| Error::with_source(Kind::Decode, e))?;

    Ok(inflated)
}

#[cfg(not(feature = "compression"))]
fn inflate(_data: &[u8]) -> Result<Vec<u8>> {
    Err(Error::with_source(
        Kind::Decode,
        std::io::Error::other("compressed payload received but compression support is disabled"),
    ))
}
