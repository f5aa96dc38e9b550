//! Encoding of curve batches
use crate::curve::IntegralCurve;
use crate::types::{FatalError, Rank, Result};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct OutgoingBatch<'a> {
    source: Rank,
    curves: &'a [IntegralCurve],
}

#[derive(Deserialize)]
struct IncomingBatch {
    source: Rank,
    curves: Vec<IntegralCurve>,
}

/// Encode a batch of curves sent by `source`
pub fn encode_curves(source: Rank, curves: &[IntegralCurve]) -> Result<Vec<u8>> {
    Ok(bincode::serialize(&OutgoingBatch { source, curves })?)
}

/// Decode a batch of curves received from `source`
pub fn decode_curves(source: Rank, bytes: &[u8]) -> Result<Vec<IntegralCurve>> {
    let batch: IncomingBatch =
        bincode::deserialize(bytes).map_err(|e| FatalError::MalformedMessage {
            source_rank: source,
            reason: e.to_string(),
        })?;
    if batch.source != source {
        return Err(FatalError::MalformedMessage {
            source_rank: source,
            reason: format!("batch claims to come from rank {}", batch.source),
        });
    }
    Ok(batch.curves)
}
