//! Transport of a single-rank run
use crate::traits::{ReduceOp, Tag, Transport};
use crate::types::{FatalError, Rank, Result};
use std::collections::VecDeque;

/// Transport of a run with one rank. Messages sent to rank 0 are looped back.
#[derive(Debug, Default)]
pub struct SerialTransport {
    queue: VecDeque<(Tag, Vec<u8>)>,
}

impl SerialTransport {
    /// Create a transport
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for SerialTransport {
    fn rank(&self) -> Rank {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send_bytes(&mut self, dest: Rank, tag: Tag, bytes: Vec<u8>) -> Result<()> {
        if dest != 0 {
            return Err(FatalError::Communication(format!(
                "cannot send to rank {dest} in a serial run"
            )));
        }
        self.queue.push_back((tag, bytes));
        Ok(())
    }

    fn try_receive_bytes(&mut self, tag: Tag) -> Result<Option<(Rank, Vec<u8>)>> {
        Ok(self
            .queue
            .iter()
            .position(|(t, _)| *t == tag)
            .and_then(|i| self.queue.remove(i))
            .map(|(_, bytes)| (0, bytes)))
    }

    fn receive_bytes(&mut self, tag: Tag) -> Result<(Rank, Vec<u8>)> {
        self.try_receive_bytes(tag)?.ok_or_else(|| {
            FatalError::Communication(format!(
                "waiting for a message with tag {tag} that nobody sent"
            ))
        })
    }

    fn complete_sends(&mut self) -> Result<usize> {
        Ok(0)
    }

    fn pending_sends(&self) -> usize {
        0
    }

    fn all_reduce_i64(&mut self, local: &[i64], _op: ReduceOp) -> Result<Vec<i64>> {
        Ok(local.to_vec())
    }

    fn all_reduce_f64(&mut self, local: &[f64], _op: ReduceOp) -> Result<Vec<f64>> {
        Ok(local.to_vec())
    }
}
