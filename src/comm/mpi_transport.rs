//! Transport over MPI
use crate::traits::{ReduceOp, Tag, Transport};
use crate::types::{FatalError, Rank, Result};
use log::warn;
use mpi::{
    collective::{CommunicatorCollectives, SystemOperation},
    point_to_point::{Destination, Source},
    request::{Request, StaticScope},
    topology::{Communicator, SimpleCommunicator},
};

/// A non-blocking send together with the buffer it reads from.
///
/// The buffer is leaked for the lifetime of the request and reclaimed once MPI is done
/// with it.
struct PendingSend {
    request: Request<'static, [u8]>,
    buffer: *mut [u8],
}

impl PendingSend {
    fn start(comm: &SimpleCommunicator, dest: Rank, tag: Tag, bytes: Vec<u8>) -> Self {
        let buffer: &'static mut [u8] = Box::leak(bytes.into_boxed_slice());
        let buffer: *mut [u8] = buffer;
        // SAFETY: the buffer is only freed in `reclaim`, after the request has completed
        let request = comm
            .process_at_rank(dest as i32)
            .immediate_send_with_tag(StaticScope, unsafe { &*buffer }, tag);
        Self { request, buffer }
    }

    /// Returns the send back if it has not completed yet
    fn test(self) -> Option<Self> {
        let PendingSend { request, buffer } = self;
        match request.test() {
            Ok(_status) => {
                Self::reclaim(buffer);
                None
            }
            Err(request) => Some(PendingSend { request, buffer }),
        }
    }

    fn wait(self) {
        self.request.wait();
        Self::reclaim(self.buffer);
    }

    fn reclaim(buffer: *mut [u8]) {
        // SAFETY: created by `Box::leak` in `start` and no longer referenced by MPI
        drop(unsafe { Box::from_raw(buffer) });
    }
}

/// Transport over an MPI communicator
pub struct MpiTransport {
    comm: SimpleCommunicator,
    pending: Vec<PendingSend>,
}

impl MpiTransport {
    /// Wrap a communicator
    pub fn new(comm: SimpleCommunicator) -> Self {
        Self {
            comm,
            pending: vec![],
        }
    }

    fn reduce<V>(&self, local: &[V], op: ReduceOp) -> Vec<V>
    where
        V: mpi::datatype::Equivalence + Copy + Default,
    {
        let mut global = vec![V::default(); local.len()];
        let op = match op {
            ReduceOp::Sum => SystemOperation::sum(),
            ReduceOp::Max => SystemOperation::max(),
            ReduceOp::Min => SystemOperation::min(),
        };
        self.comm.all_reduce_into(local, &mut global[..], op);
        global
    }
}

impl Drop for MpiTransport {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            warn!(
                "Rank {} waiting for {} outstanding sends",
                self.comm.rank(),
                self.pending.len()
            );
        }
        for send in self.pending.drain(..) {
            send.wait();
        }
    }
}

impl Transport for MpiTransport {
    fn rank(&self) -> Rank {
        self.comm.rank() as Rank
    }

    fn size(&self) -> usize {
        self.comm.size() as usize
    }

    fn send_bytes(&mut self, dest: Rank, tag: Tag, bytes: Vec<u8>) -> Result<()> {
        if dest >= self.size() {
            return Err(FatalError::Communication(format!(
                "no rank {dest} in a communicator of {} ranks",
                self.size()
            )));
        }
        self.pending
            .push(PendingSend::start(&self.comm, dest, tag, bytes));
        Ok(())
    }

    fn try_receive_bytes(&mut self, tag: Tag) -> Result<Option<(Rank, Vec<u8>)>> {
        Ok(self
            .comm
            .any_process()
            .immediate_matched_probe_with_tag(tag)
            .map(|(message, status)| {
                let (bytes, _) = message.matched_receive_vec::<u8>();
                (status.source_rank() as Rank, bytes)
            }))
    }

    fn receive_bytes(&mut self, tag: Tag) -> Result<(Rank, Vec<u8>)> {
        let (message, status) = self.comm.any_process().matched_probe_with_tag(tag);
        let (bytes, _) = message.matched_receive_vec::<u8>();
        Ok((status.source_rank() as Rank, bytes))
    }

    fn complete_sends(&mut self) -> Result<usize> {
        let before = self.pending.len();
        self.pending = self
            .pending
            .drain(..)
            .filter_map(PendingSend::test)
            .collect();
        Ok(before - self.pending.len())
    }

    fn pending_sends(&self) -> usize {
        self.pending.len()
    }

    fn all_reduce_i64(&mut self, local: &[i64], op: ReduceOp) -> Result<Vec<i64>> {
        Ok(self.reduce(local, op))
    }

    fn all_reduce_f64(&mut self, local: &[f64], op: ReduceOp) -> Result<Vec<f64>> {
        Ok(self.reduce(local, op))
    }
}
