//! Envelope Codec
//!
//! JSON text frames in, [`Envelope`]s out, and back again. Malformed
//! inbound frames surface as [`CodecError`] so the read loop can log and
//! drop them without tearing the connection down.

use thiserror::Error;

use crate::domain::envelope::Envelope;

/// Codec failures.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The frame was not a valid envelope.
    #[error("invalid envelope: {0}")]
    Json(#[from] serde_json::Error),
}

/// Stateless JSON envelope codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] when the frame is not a valid envelope.
    pub fn decode(&self, text: &str) -> Result<Envelope, CodecError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode one envelope to a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] when serialization fails.
    pub fn encode(&self, envelope: &Envelope) -> Result<String, CodecError> {
        Ok(serde_json::to_string(envelope)?)
    }
}
