//! Correlation identifiers for batch and command tracking.
//!
//! Every command dispatched to the forwarder is tagged with an
//! [`InternalCorrelationId`], never with the caller's original correlation id
//! directly. The internal id is globally unique even when two commands in
//! different batches, or a retried submission, share the same original id,
//! and the original id can always be recovered from it.

use crate::error::{BatcherError, BatcherResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque batch identity, unique within the cluster for the lifetime of one
/// batch execution. Doubles as the journal entity id for its coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh batch identity for callers that did not supply one.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BatchId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Coordinator-minted identifier for one command instance within one batch
/// attempt: `{batch_id, nonce, original}`.
///
/// The random nonce disambiguates retried submissions that reuse an original
/// correlation id. The encode/decode pair is total and lossless, so the
/// original id is recoverable from any encoded form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InternalCorrelationId {
    pub batch_id: BatchId,
    pub nonce: Uuid,
    pub original: String,
}

impl InternalCorrelationId {
    /// Mint a new internal id for a command within a batch.
    pub fn mint(batch_id: BatchId, original: impl Into<String>) -> Self {
        Self {
            batch_id,
            nonce: Uuid::new_v4(),
            original: original.into(),
        }
    }

    /// The caller-supplied correlation id this internal id wraps.
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Encode to a single string for transport and logging.
    ///
    /// The batch id is base64-encoded so the two leading fields are free of
    /// the separator; the original id rides verbatim in the final position
    /// and may contain any characters.
    pub fn encode(&self) -> String {
        format!(
            "{}:{}:{}",
            URL_SAFE_NO_PAD.encode(self.batch_id.as_str().as_bytes()),
            self.nonce,
            self.original
        )
    }

    /// Decode an encoded internal correlation id.
    pub fn decode(encoded: &str) -> BatcherResult<Self> {
        let mut parts = encoded.splitn(3, ':');
        let (batch_part, nonce_part, original) =
            match (parts.next(), parts.next(), parts.next()) {
                (Some(b), Some(n), Some(o)) => (b, n, o),
                _ => {
                    return Err(BatcherError::CorrelationError(format!(
                        "Malformed internal correlation id: {encoded}"
                    )))
                }
            };

        let batch_bytes = URL_SAFE_NO_PAD.decode(batch_part).map_err(|e| {
            BatcherError::CorrelationError(format!("Invalid batch id encoding: {e}"))
        })?;
        let batch_id = String::from_utf8(batch_bytes).map_err(|e| {
            BatcherError::CorrelationError(format!("Batch id is not valid UTF-8: {e}"))
        })?;
        let nonce = Uuid::parse_str(nonce_part)
            .map_err(|e| BatcherError::CorrelationError(format!("Invalid nonce: {e}")))?;

        Ok(Self {
            batch_id: BatchId::new(batch_id),
            nonce,
            original: original.to_string(),
        })
    }
}

/// `Display` delegates to `encode` so log fields and wire tags agree.
impl std::fmt::Display for InternalCorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}
