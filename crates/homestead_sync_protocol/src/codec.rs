//! CBOR wire codec.

use crate::error::{ProtocolError, ProtocolResult};
use crate::messages::{
    HandshakeRequest, HandshakeResponse, PullRequest, PullResponse, PushRequest, PushResponse,
    SyncMessage,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value as CBOR.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decodes a value from CBOR.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}

/// A message that travels as a CBOR body.
pub trait WireMessage: Serialize + DeserializeOwned {
    /// Encodes to CBOR.
    fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}

impl WireMessage for SyncMessage {}
impl WireMessage for HandshakeRequest {}
impl WireMessage for HandshakeResponse {}
impl WireMessage for PullRequest {}
impl WireMessage for PullResponse {}
impl WireMessage for PushRequest {}
impl WireMessage for PushResponse {}
