//! Message transport between ranks
use crate::types::{Rank, Result};

/// Message tag
pub type Tag = i32;

/// Reduction operation of a collective
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    /// Sum
    Sum,
    /// Maximum
    Max,
    /// Minimum
    Min,
}

/// Point-to-point and collective messaging between the ranks of a run.
///
/// Messages between an ordered pair of ranks with the same tag arrive in send order.
/// Collectives are synchronisation points: every rank must call them in the same order.
/// Any error is fatal to the run.
pub trait Transport {
    /// This rank
    fn rank(&self) -> Rank;

    /// Number of ranks
    fn size(&self) -> usize;

    /// Start a non-blocking send. The buffer is owned by the transport until the send completes.
    fn send_bytes(&mut self, dest: Rank, tag: Tag, bytes: Vec<u8>) -> Result<()>;

    /// Receive a message with `tag` from any rank if one is available
    fn try_receive_bytes(&mut self, tag: Tag) -> Result<Option<(Rank, Vec<u8>)>>;

    /// Wait for a message with `tag` from any rank
    fn receive_bytes(&mut self, tag: Tag) -> Result<(Rank, Vec<u8>)>;

    /// Reclaim the buffers of completed sends. Returns the number reclaimed.
    fn complete_sends(&mut self) -> Result<usize>;

    /// Number of sends not yet known to be complete
    fn pending_sends(&self) -> usize;

    /// Element-wise all-reduce of integers
    fn all_reduce_i64(&mut self, local: &[i64], op: ReduceOp) -> Result<Vec<i64>>;

    /// Element-wise all-reduce of floats
    fn all_reduce_f64(&mut self, local: &[f64], op: ReduceOp) -> Result<Vec<f64>>;
}
