//! In-process transport where every rank is a thread
use crate::traits::{ReduceOp, Tag, Transport};
use crate::types::{FatalError, Rank, Result};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use std::collections::VecDeque;
use std::sync::{Arc, Barrier, Mutex, MutexGuard};

struct Envelope {
    source: Rank,
    tag: Tag,
    bytes: Vec<u8>,
}

struct Collective {
    barrier: Barrier,
    ints: Mutex<Vec<Vec<i64>>>,
    floats: Mutex<Vec<Vec<f64>>>,
}

fn lock<V>(slots: &Mutex<V>) -> Result<MutexGuard<'_, V>> {
    slots
        .lock()
        .map_err(|_| FatalError::Communication(String::from("a rank panicked in a collective")))
}

impl Collective {
    fn reduce<V: Copy>(
        &self,
        slots: &Mutex<Vec<Vec<V>>>,
        rank: Rank,
        local: &[V],
        fold: impl Fn(V, V) -> V,
    ) -> Result<Vec<V>> {
        lock(slots)?[rank] = local.to_vec();
        self.barrier.wait();
        let result = lock(slots).and_then(|contributions| {
            if contributions.iter().any(|c| c.len() != local.len()) {
                return Err(FatalError::Communication(String::from(
                    "ranks contributed arrays of different lengths to a reduction",
                )));
            }
            Ok((0..local.len())
                .map(|i| {
                    contributions[1..]
                        .iter()
                        .fold(contributions[0][i], |acc, c| fold(acc, c[i]))
                })
                .collect())
        });
        // nobody may write the next contribution before everyone has read this one
        self.barrier.wait();
        result
    }
}

/// One rank of a [LocalCluster]
pub struct LocalTransport {
    rank: Rank,
    senders: Vec<Sender<Envelope>>,
    receiver: Receiver<Envelope>,
    stash: VecDeque<Envelope>,
    collective: Arc<Collective>,
}

impl LocalTransport {
    fn take_stashed(&mut self, tag: Tag) -> Option<(Rank, Vec<u8>)> {
        self.stash
            .iter()
            .position(|e| e.tag == tag)
            .and_then(|i| self.stash.remove(i))
            .map(|e| (e.source, e.bytes))
    }
}

impl Transport for LocalTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn send_bytes(&mut self, dest: Rank, tag: Tag, bytes: Vec<u8>) -> Result<()> {
        let sender = self.senders.get(dest).ok_or_else(|| {
            FatalError::Communication(format!("no rank {dest} in the local cluster"))
        })?;
        sender
            .send(Envelope {
                source: self.rank,
                tag,
                bytes,
            })
            .map_err(|_| FatalError::Communication(format!("rank {dest} has shut down")))
    }

    fn try_receive_bytes(&mut self, tag: Tag) -> Result<Option<(Rank, Vec<u8>)>> {
        if let Some(message) = self.take_stashed(tag) {
            return Ok(Some(message));
        }
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) if envelope.tag == tag => {
                    return Ok(Some((envelope.source, envelope.bytes)))
                }
                Ok(envelope) => self.stash.push_back(envelope),
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => {
                    return Err(FatalError::Communication(String::from(
                        "local cluster disconnected",
                    )))
                }
            }
        }
    }

    fn receive_bytes(&mut self, tag: Tag) -> Result<(Rank, Vec<u8>)> {
        if let Some(message) = self.take_stashed(tag) {
            return Ok(message);
        }
        loop {
            let envelope = self.receiver.recv().map_err(|_| {
                FatalError::Communication(String::from("local cluster disconnected"))
            })?;
            if envelope.tag == tag {
                return Ok((envelope.source, envelope.bytes));
            }
            self.stash.push_back(envelope);
        }
    }

    fn complete_sends(&mut self) -> Result<usize> {
        // channel sends complete immediately
        Ok(0)
    }

    fn pending_sends(&self) -> usize {
        0
    }

    fn all_reduce_i64(&mut self, local: &[i64], op: ReduceOp) -> Result<Vec<i64>> {
        let fold: fn(i64, i64) -> i64 = match op {
            ReduceOp::Sum => |a: i64, b: i64| a + b,
            ReduceOp::Max => |a: i64, b: i64| a.max(b),
            ReduceOp::Min => |a: i64, b: i64| a.min(b),
        };
        self.collective
            .reduce(&self.collective.ints, self.rank, local, fold)
    }

    fn all_reduce_f64(&mut self, local: &[f64], op: ReduceOp) -> Result<Vec<f64>> {
        let fold: fn(f64, f64) -> f64 = match op {
            ReduceOp::Sum => |a: f64, b: f64| a + b,
            ReduceOp::Max => |a: f64, b: f64| a.max(b),
            ReduceOp::Min => |a: f64, b: f64| a.min(b),
        };
        self.collective
            .reduce(&self.collective.floats, self.rank, local, fold)
    }
}

/// A set of connected in-process ranks
pub struct LocalCluster {
    transports: Vec<LocalTransport>,
}

impl LocalCluster {
    /// Connect `size` ranks
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "a cluster needs at least one rank");
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();
        let collective = Arc::new(Collective {
            barrier: Barrier::new(size),
            ints: Mutex::new(vec![vec![]; size]),
            floats: Mutex::new(vec![vec![]; size]),
        });
        let transports = receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| LocalTransport {
                rank,
                senders: senders.clone(),
                receiver,
                stash: VecDeque::new(),
                collective: Arc::clone(&collective),
            })
            .collect();
        Self { transports }
    }

    /// Number of ranks
    pub fn size(&self) -> usize {
        self.transports.len()
    }

    /// The transports, ordered by rank
    pub fn into_transports(self) -> Vec<LocalTransport> {
        self.transports
    }
}

/// Run `f` on `size` threads, each with the transport of one rank, and collect the
/// results ordered by rank.
///
/// # Panics
///
/// Panics if any rank panics.
pub fn run_local_cluster<R, F>(size: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(LocalTransport) -> R + Sync,
{
    let transports = LocalCluster::new(size).into_transports();
    std::thread::scope(|scope| {
        let f = &f;
        let handles = transports
            .into_iter()
            .map(|transport| scope.spawn(move || f(transport)))
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|h| match h.join() {
                Ok(result) => result,
                Err(e) => std::panic::resume_unwind(e),
            })
            .collect()
    })
}
