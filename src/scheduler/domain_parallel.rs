//! Parallelisation over domains
use super::rank_state::{Locality, RankState};
use crate::curve::{CurveHandle, IntegralCurve, Seed};
use crate::statistics::{GlobalStatistics, Statistics};
use crate::traits::{FieldProvider, OdeStepper, RoundOutcome, Scheduler, Transport};
use crate::types::Result;
use log::{debug, info};

/// Domains are statically partitioned over the ranks and every curve is integrated by
/// the owner of the domain it is in.
pub struct DomainParallelScheduler<P: FieldProvider, S: OdeStepper, T: Transport> {
    state: RankState<P, S, T>,
}

impl<P: FieldProvider, S: OdeStepper, T: Transport> DomainParallelScheduler<P, S, T> {
    pub(crate) fn new(state: RankState<P, S, T>) -> Self {
        Self { state }
    }
}

impl<P: FieldProvider, S: OdeStepper, T: Transport> Scheduler for DomainParallelScheduler<P, S, T> {
    fn add_work(&mut self, seeds: &[Seed]) -> Result<()> {
        self.state.add_seeds(seeds, Locality::Owned)?;
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
            let (sent, received) = self.state.route_out_of_bounds()?;
            outcome.sent = sent;
            outcome.received = received;
        }
        self.state.sync_cache_stats();
        debug!(
            "Rank {} round {}: advected {}, active {} of {}, sent {}, received {}",
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
        self.state.resolve_locally(handle, Locality::Owned)
    }

    fn check_global_done(&mut self) -> Result<bool> {
        Ok(self.state.reduce_active()? == 0)
    }

    fn execute(&mut self) -> Result<()> {
        while !self.run_round()?.done() {}
        if self.state.rank() == 0 {
            info!("Fixed point reached after {} rounds", self.state.round);
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
