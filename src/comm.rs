//! Communication of curves between ranks
mod local;
mod message;
#[cfg(feature = "mpi")]
mod mpi_transport;
mod serial;

pub use local::{run_local_cluster, LocalCluster, LocalTransport};
pub use message::{decode_curves, encode_curves};
#[cfg(feature = "mpi")]
pub use mpi_transport::MpiTransport;
pub use serial::SerialTransport;

use crate::curve::IntegralCurve;
use crate::traits::{ReduceOp, Tag, Transport};
use crate::types::{FatalError, Rank, Result};
use log::trace;
use std::collections::BTreeMap;

/// Tag of curves routed during the round loop
pub const CURVE_TAG: Tag = 100;
/// Tag of finished curves returned to their originating rank
pub const RESULT_TAG: Tag = 101;

/// Curves sent and received by one exchange
#[derive(Debug, Default)]
pub struct Exchange {
    /// Curves that arrived
    pub received: Vec<IntegralCurve>,
    /// Number of curves sent to other ranks
    pub sent: usize,
    /// Number of messages sent
    pub messages: usize,
}

/// Batched sending and receiving of curves, and the collectives of the round loop
pub struct CommunicationLayer<T: Transport> {
    transport: T,
    num_recvs: usize,
}

impl<T: Transport> CommunicationLayer<T> {
    /// Create a layer draining at most `num_recvs` messages per non-blocking poll
    pub fn new(transport: T, num_recvs: usize) -> Self {
        Self {
            transport,
            num_recvs: num_recvs.max(1),
        }
    }

    /// This rank
    pub fn rank(&self) -> Rank {
        self.transport.rank()
    }

    /// Number of ranks
    pub fn size(&self) -> usize {
        self.transport.size()
    }

    /// The underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send a batch of curves without waiting for delivery
    pub fn send_curves(&mut self, dest: Rank, curves: &[IntegralCurve]) -> Result<()> {
        self.send_tagged(dest, CURVE_TAG, curves)
    }

    /// Drain available curve batches from any rank.
    ///
    /// If `blocking`, waits until at least one batch has arrived.
    pub fn receive_any(&mut self, blocking: bool) -> Result<Vec<IntegralCurve>> {
        self.receive_tagged(CURVE_TAG, blocking)
    }

    /// Reclaim the resources of completed sends
    pub fn check_pending_send_requests(&mut self) -> Result<usize> {
        self.transport.complete_sends()
    }

    /// Sum an integer over all ranks. Collective.
    pub fn sum_int_across_all_processors(&mut self, value: i64) -> Result<i64> {
        first(self.transport.all_reduce_i64(&[value], ReduceOp::Sum)?)
    }

    /// Element-wise sum of an array over all ranks. Collective.
    pub fn sum_int_array_across_all_processors(&mut self, values: &[i64]) -> Result<Vec<i64>> {
        self.transport.all_reduce_i64(values, ReduceOp::Sum)
    }

    /// Element-wise maximum of an array over all ranks. Collective.
    pub fn max_int_array_across_all_processors(&mut self, values: &[i64]) -> Result<Vec<i64>> {
        self.transport.all_reduce_i64(values, ReduceOp::Max)
    }

    /// Maximum of an integer over all ranks. Collective.
    pub fn max_int_across_all_processors(&mut self, value: i64) -> Result<i64> {
        first(self.transport.all_reduce_i64(&[value], ReduceOp::Max)?)
    }

    /// Minimum of an integer over all ranks. Collective.
    pub fn min_int_across_all_processors(&mut self, value: i64) -> Result<i64> {
        first(self.transport.all_reduce_i64(&[value], ReduceOp::Min)?)
    }

    /// Maximum of a float over all ranks. Collective.
    pub fn unify_maximum_value(&mut self, value: f64) -> Result<f64> {
        first(self.transport.all_reduce_f64(&[value], ReduceOp::Max)?)
    }

    /// Deliver batches of curves to their destination ranks. Collective.
    ///
    /// The number of curves each rank must expect is agreed on with a sum reduction,
    /// then the batches are sent and this rank blocks until its share has arrived.
    pub fn exchange_curves(
        &mut self,
        outgoing: BTreeMap<Rank, Vec<IntegralCurve>>,
    ) -> Result<Exchange> {
        self.exchange_tagged(CURVE_TAG, outgoing)
    }

    /// Like [Self::exchange_curves] for finished curves returned to their originating rank
    pub fn exchange_results(
        &mut self,
        outgoing: BTreeMap<Rank, Vec<IntegralCurve>>,
    ) -> Result<Exchange> {
        self.exchange_tagged(RESULT_TAG, outgoing)
    }

    fn exchange_tagged(
        &mut self,
        tag: Tag,
        outgoing: BTreeMap<Rank, Vec<IntegralCurve>>,
    ) -> Result<Exchange> {
        let rank = self.rank();
        let size = self.size();
        let mut counts = vec![0; size];
        for (dest, batch) in &outgoing {
            let count = counts.get_mut(*dest).ok_or_else(|| {
                FatalError::Communication(format!("no rank {dest} in a run of {size} ranks"))
            })?;
            *count += batch.len() as i64;
        }
        let totals = self.sum_int_array_across_all_processors(&counts)?;
        let expected = totals.get(rank).copied().ok_or_else(|| {
            FatalError::Communication(format!("no count for rank {rank} after reduction"))
        })?;
        let expected = expected.max(0) as usize;

        let mut exchange = Exchange::default();
        for (dest, batch) in outgoing {
            if batch.is_empty() {
                continue;
            }
            if dest == rank {
                exchange.received.extend(batch);
                continue;
            }
            trace!("Rank {rank} sends {} curves to rank {dest}", batch.len());
            self.send_tagged(dest, tag, &batch)?;
            exchange.sent += batch.len();
            exchange.messages += 1;
        }

        while exchange.received.len() < expected {
            let batch = self.receive_tagged(tag, true)?;
            exchange.received.extend(batch);
        }
        if exchange.received.len() > expected {
            return Err(FatalError::Communication(format!(
                "rank {rank} expected {expected} curves but received {}",
                exchange.received.len()
            )));
        }
        self.check_pending_send_requests()?;
        Ok(exchange)
    }

    fn send_tagged(&mut self, dest: Rank, tag: Tag, curves: &[IntegralCurve]) -> Result<()> {
        let bytes = encode_curves(self.rank(), curves)?;
        self.transport.send_bytes(dest, tag, bytes)
    }

    fn receive_tagged(&mut self, tag: Tag, blocking: bool) -> Result<Vec<IntegralCurve>> {
        let mut curves = vec![];
        let mut messages = 0;
        if blocking {
            let (source, bytes) = self.transport.receive_bytes(tag)?;
            curves.extend(decode_curves(source, &bytes)?);
            messages += 1;
        }
        while messages < self.num_recvs {
            match self.transport.try_receive_bytes(tag)? {
                Some((source, bytes)) => {
                    curves.extend(decode_curves(source, &bytes)?);
                    messages += 1;
                }
                None => break,
            }
        }
        Ok(curves)
    }
}

fn first<V: Copy>(values: Vec<V>) -> Result<V> {
    values.first().copied().ok_or_else(|| {
        FatalError::Communication(String::from("reduction returned no value"))
    })
}
