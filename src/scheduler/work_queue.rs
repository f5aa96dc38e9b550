//! Dynamic work queue
use super::rank_state::{Locality, RankState};
use crate::curve::{CurveHandle, IntegralCurve, Seed};
use crate::statistics::{GlobalStatistics, Statistics};
use crate::traits::{FieldProvider, OdeStepper, RoundOutcome, Scheduler, Transport};
use crate::types::{Rank, Result};
use log::{debug, info, trace};
use std::collections::BTreeMap;
use std::time::Instant;

/// Curves moved from a loaded rank to an idle one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    /// Donating rank
    pub from: Rank,
    /// Receiving rank
    pub to: Rank,
    /// Number of curves
    pub count: usize,
}

/// Plan the transfers of a round from the active counts of all ranks.
///
/// Idle ranks, in rank order, each take half the curves of the currently most loaded
/// rank (ties go to the lower rank) as long as that rank has at least two curves. Every
/// rank computes the same plan from the same counts.
pub fn plan_work_transfers(loads: &[usize]) -> Vec<Transfer> {
    let mut loads = loads.to_vec();
    let idle = (0..loads.len()).filter(|&r| loads[r] == 0).collect::<Vec<_>>();
    let mut transfers = vec![];
    for to in idle {
        let donor = (0..loads.len())
            .filter(|&r| loads[r] >= 2)
            .max_by(|&a, &b| loads[a].cmp(&loads[b]).then(b.cmp(&a)));
        let Some(from) = donor else {
            break;
        };
        let count = loads[from] / 2;
        loads[from] -= count;
        loads[to] += count;
        transfers.push(Transfer { from, to, count });
    }
    transfers
}

/// Seeds are spread round-robin over the ranks, every rank integrates in any domain,
/// loading it on demand, and idle ranks receive curves from loaded ones.
pub struct WorkQueueScheduler<P: FieldProvider, S: OdeStepper, T: Transport> {
    state: RankState<P, S, T>,
    loads: Vec<usize>,
}

impl<P: FieldProvider, S: OdeStepper, T: Transport> WorkQueueScheduler<P, S, T> {
    pub(crate) fn new(state: RankState<P, S, T>) -> Self {
        Self {
            loads: vec![0; state.ctx.size()],
            state,
        }
    }

    fn balance(&mut self) -> Result<(usize, usize)> {
        let rank = self.state.rank();
        let mut batches: BTreeMap<Rank, Vec<IntegralCurve>> = BTreeMap::new();
        for transfer in plan_work_transfers(&self.loads) {
            if transfer.from != rank {
                continue;
            }
            let mut handles = vec![];
            while handles.len() < transfer.count {
                let Some(handle) = self.state.active.pop_back() else {
                    break;
                };
                handles.push(handle);
            }
            trace!(
                "Rank {rank} gives {} curves to rank {}",
                handles.len(),
                transfer.to
            );
            let curves = self.state.take_curves(handles)?;
            batches.entry(transfer.to).or_default().extend(curves);
        }
        let (sent, arrived) = self.state.exchange(batches)?;
        let received = arrived.len();
        self.state.accept_arrivals(arrived, Locality::Any)?;
        Ok((sent, received))
    }
}

impl<P: FieldProvider, S: OdeStepper, T: Transport> Scheduler for WorkQueueScheduler<P, S, T> {
    fn add_work(&mut self, seeds: &[Seed]) -> Result<()> {
        self.state.add_seeds(seeds, Locality::Any)?;
        Ok(())
    }

    fn run_round(&mut self) -> Result<RoundOutcome> {
        self.state.round += 1;
        self.state.stats.rounds += 1;
        let (advected, left) = self.state.advect_active()?;
        for handle in left {
            self.handle_out_of_bounds(handle)?;
        }

        let mut outcome = RoundOutcome {
            round: self.state.round,
            advected,
            local_active: self.state.local_active(),
            ..Default::default()
        };
        let done = self.check_global_done()?;
        outcome.global_active = self.state.last_global_active;
        if !done {
            let (sent, received) = self.balance()?;
            outcome.sent = sent;
            outcome.received = received;
        }
        self.state.sync_cache_stats();
        debug!(
            "Rank {} round {}: advected {}, active {} of {}, gave {}, took {}",
            self.state.rank(),
            outcome.round,
            outcome.advected,
            outcome.local_active,
            outcome.global_active,
            outcome.sent,
            outcome.received
        );
        Ok(outcome)
    }

    fn handle_out_of_bounds(&mut self, handle: CurveHandle) -> Result<()> {
        self.state.resolve_locally(handle, Locality::Any)
    }

    /// Gathers the active count of every rank, which also drives the load balancing
    fn check_global_done(&mut self) -> Result<bool> {
        let size = self.state.ctx.size();
        let mut local = vec![0; size];
        local[self.state.rank()] = self.state.local_active() as i64;
        let start = Instant::now();
        let loads = self
            .state
            .comm
            .sum_int_array_across_all_processors(&local)?;
        self.state.stats.comm_time += start.elapsed();
        self.loads = loads.iter().map(|&l| l.max(0) as usize).collect();
        self.state.last_global_active = self.loads.iter().sum();
        Ok(self.state.last_global_active == 0)
    }

    fn execute(&mut self) -> Result<()> {
        while !self.run_round()?.done() {}
        if self.state.rank() == 0 {
            info!("Work queue drained after {} rounds", self.state.round);
        }
        self.state.finish_execute()
    }

    fn terminated_curves(&mut self) -> Result<Vec<IntegralCurve>> {
        self.state.take_terminated()
    }

    fn statistics(&self) -> &Statistics {
        &self.state.stats
    }

    fn global_statistics(&self) -> Option<&GlobalStatistics> {
        self.state.global_stats.as_ref()
    }
}
