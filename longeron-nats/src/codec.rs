//! Pluggable payload serialization.
//!
//! A [`PayloadCodec`] turns typed values into wire payloads and back. The
//! codec for a payload is selected by target type at the call site; the
//! engine only requires that encoding and decoding be synchronous and
//! side-effect-free. Encoding happens at enqueue time so serialization
//! failures surface synchronously to the caller and a failing value is
//! never queued.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use longeron_core::error::{LongeronError, Result};

/// Symmetric serializer for one payload type.
pub trait PayloadCodec<T>: Send + Sync {
    /// Encode a value into a wire payload.
    ///
    /// # Errors
    ///
    /// Returns a serialization error; the command is not enqueued.
    fn encode(&self, value: &T) -> Result<Bytes>;

    /// Decode a wire payload into a value.
    ///
    /// # Errors
    ///
    /// Returns a deserialization error.
    fn decode(&self, payload: &[u8]) -> Result<T>;
}

/// JSON codec for any serde-compatible type. The default codec for typed
/// publishes and receives.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> PayloadCodec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| LongeronError::serialization(e.to_string()))
    }

    fn decode(&self, payload: &[u8]) -> Result<T> {
        serde_json::from_slice(payload).map_err(|e| LongeronError::deserialization(e.to_string()))
    }
}

/// Identity codec passing raw bytes through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl PayloadCodec<Bytes> for RawCodec {
    fn encode(&self, value: &Bytes) -> Result<Bytes> {
        Ok(value.clone())
    }

    fn decode(&self, payload: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(payload))
    }
}

impl PayloadCodec<Vec<u8>> for RawCodec {
    fn encode(&self, value: &Vec<u8>) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(value))
    }

    fn decode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        Ok(payload.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Reading {
        sensor: String,
        value: f64,
    }

    #[test]
    fn json_round_trip() {
        let reading = Reading {
            sensor: "temp".to_string(),
            value: 23.5,
        };

        let encoded = JsonCodec.encode(&reading).unwrap();
        let decoded: Reading = JsonCodec.decode(&encoded).unwrap();
        assert_eq!(decoded, reading);
    }

    #[test]
    fn json_decode_error_is_deserialization() {
        let err = <JsonCodec as PayloadCodec<Reading>>::decode(&JsonCodec, b"not json").unwrap_err();
        assert!(matches!(err, LongeronError::Deserialization(_)));
    }

    #[test]
    fn raw_codec_passes_bytes_through() {
        let payload = Bytes::from_static(b"opaque");
        let encoded = PayloadCodec::<Bytes>::encode(&RawCodec, &payload).unwrap();
        assert_eq!(encoded, payload);
    }
}
