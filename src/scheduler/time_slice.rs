//! Parallelisation over domains across a sequence of time slices
use super::rank_state::{Locality, RankState};
use crate::comm::CommunicationLayer;
use crate::curve::{CurveHandle, IntegralCurve, Seed, Status, TerminationReason};
use crate::restart::RestartStore;
use crate::statistics::{GlobalStatistics, Statistics};
use crate::traits::{FieldProvider, OdeStepper, RoundOutcome, Scheduler, Transport};
use crate::types::Result;
use log::{debug, info, warn};

/// Domain-parallel integration of curves that travel through time slices.
///
/// Curves reaching the end of the current slice are parked in the terminated queue.
/// Once the whole run reaches its fixed point the ranks agree whether any parked curve
/// needs a later slice; if so the next slice becomes current, its domains replace the
/// old ones and the parked curves are routed into it.
pub struct TimeSliceScheduler<P: FieldProvider, S: OdeStepper, T: Transport> {
    state: RankState<P, S, T>,
    current_slice: i32,
    restart: Option<RestartStore>,
}

impl<P: FieldProvider, S: OdeStepper, T: Transport> TimeSliceScheduler<P, S, T> {
    pub(crate) fn new(state: RankState<P, S, T>) -> Self {
        let restart = state
            .config
            .restart_dir
            .as_ref()
            .map(|dir| RestartStore::new(dir, state.rank()));
        Self {
            state,
            current_slice: 0,
            restart,
        }
    }

    /// The time slice being integrated
    pub fn current_slice(&self) -> i32 {
        self.current_slice
    }

    fn park(&mut self, handle: CurveHandle) -> Result<()> {
        self.state
            .arena
            .get_mut(handle)?
            .terminate(TerminationReason::SliceBoundary);
        self.state.finish(handle)
    }

    /// Whether any parked curve on any rank needs a later time slice. Collective.
    pub fn check_next_time_step_needed(&mut self) -> Result<bool> {
        let waiting = self
            .state
            .terminated
            .iter()
            .filter_map(|&h| self.state.arena.get(h).ok())
            .filter(|c| c.needs_time_step_after(self.current_slice))
            .count();
        let needed = self
            .state
            .comm
            .sum_int_across_all_processors(waiting as i64)?;
        Ok(needed > 0)
    }

    /// Move to the next time slice if any curve needs it. Collective.
    fn advance_time_slice(&mut self) -> Result<bool> {
        if self.current_slice >= self.state.config.final_time_slice
            || !self.check_next_time_step_needed()?
        {
            return Ok(false);
        }
        let previous = self.current_slice;
        self.current_slice += 1;
        self.state.stats.time_slices += 1;
        self.state.cache.purge_time_steps_before(self.current_slice);
        if self.state.rank() == 0 {
            info!("Advancing to time slice {}", self.current_slice);
        }

        let mut revived = vec![];
        let mut parked = vec![];
        for handle in std::mem::take(&mut self.state.terminated) {
            let curve = self.state.arena.get_mut(handle)?;
            if curve.needs_time_step_after(previous) {
                curve.reset_for_continue_execute();
                self.state.stats.finished = self.state.stats.finished.saturating_sub(1);
                revived.push(handle);
            } else {
                parked.push(handle);
            }
        }
        self.state.terminated = parked;
        debug!(
            "Rank {} continues {} curves in time slice {}",
            self.state.rank(),
            revived.len(),
            self.current_slice
        );

        if let Some(store) = &self.restart {
            let curves = self
                .state
                .arena
                .iter()
                .map(|(_, c)| c.clone())
                .collect::<Vec<_>>();
            store.save_ics(&curves, self.current_slice)?;
        }
        for handle in revived {
            self.handle_out_of_bounds(handle)?;
        }
        Ok(true)
    }

    /// Resume from the latest time slice every rank has readable restart data for.
    /// Collective.
    fn try_restart(&mut self) -> Result<()> {
        let Some(store) = self.restart.clone() else {
            return Ok(());
        };
        let final_slice = self.state.config.final_time_slice;
        for slice in (self.current_slice..=final_slice).rev() {
            let local = i64::from(store.check_if_restart(slice));
            let everywhere = self.state.comm.min_int_across_all_processors(local)?;
            if everywhere == 1 {
                let restored = store.restore_ics(slice);
                if let Some(curves) = agree_on_restored(&mut self.state.comm, slice, restored)? {
                    return self.restore(curves, slice);
                }
                continue;
            }
            let anywhere = self.state.comm.max_int_across_all_processors(local)?;
            if anywhere == 1 && self.state.rank() == 0 {
                warn!("Restart data for time slice {slice} is incomplete, ignoring it");
            }
        }
        Ok(())
    }

    fn restore(&mut self, curves: Vec<IntegralCurve>, slice: i32) -> Result<()> {
        let max_id = curves.iter().map(|c| c.id as i64).max().unwrap_or(-1);
        let max_id = self.state.comm.max_int_across_all_processors(max_id)?;
        if max_id >= 0 {
            self.state.ctx.reserve_ids_through(max_id as u64);
        }
        if self.state.rank() == 0 {
            info!("Restarting from time slice {slice}");
        }

        self.state.clear();
        self.current_slice = slice;
        self.state.cache.purge_time_steps_before(slice);
        self.state.stats.seeded_curves += curves.len();
        let mut pending = vec![];
        for curve in curves {
            let status = curve.status;
            let handle = self.state.arena.insert(curve);
            match status {
                Status::Ok => self.state.active.push_back(handle),
                Status::OutOfBounds => pending.push(handle),
                Status::Finished | Status::Error => self.state.finish(handle)?,
            }
        }
        for handle in pending {
            self.handle_out_of_bounds(handle)?;
        }
        Ok(())
    }
}

/// Keep the curves read from restart data only if every rank could read its own.
/// Collective.
fn agree_on_restored<T: Transport>(
    comm: &mut CommunicationLayer<T>,
    slice: i32,
    restored: Result<Vec<IntegralCurve>>,
) -> Result<Option<Vec<IntegralCurve>>> {
    let curves = match restored {
        Ok(curves) => Some(curves),
        Err(e) => {
            warn!(
                "Rank {} cannot read restart data for time slice {slice}: {e}",
                comm.rank()
            );
            None
        }
    };
    let everywhere = comm.min_int_across_all_processors(i64::from(curves.is_some()))?;
    if everywhere == 1 {
        return Ok(curves);
    }
    if comm.rank() == 0 {
        warn!("Restart data for time slice {slice} is unreadable on some rank, ignoring it");
    }
    Ok(None)
}

impl<P: FieldProvider, S: OdeStepper, T: Transport> Scheduler for TimeSliceScheduler<P, S, T> {
    fn add_work(&mut self, seeds: &[Seed]) -> Result<()> {
        let accepted = self.state.add_seeds(seeds, Locality::Owned)?;
        // seeds of later slices wait for their slice
        for handle in accepted {
            let domain = self.state.arena.get(handle)?.domain;
            if domain.time_step > self.current_slice {
                self.state.active.retain(|&h| h != handle);
                self.state.arena.get_mut(handle)?.mark_out_of_bounds(vec![domain]);
                self.park(handle)?;
            }
        }
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
            "Rank {} slice {} round {}: advected {}, active {} of {}, sent {}, received {}",
            self.state.rank(),
            self.current_slice,
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
        let curve = self.state.arena.get(handle)?;
        if curve
            .seed_pt_domain_list
            .iter()
            .any(|d| d.time_step > self.current_slice)
        {
            return self.park(handle);
        }
        self.state.resolve_locally(handle, Locality::Owned)
    }

    fn check_global_done(&mut self) -> Result<bool> {
        Ok(self.state.reduce_active()? == 0)
    }

    fn execute(&mut self) -> Result<()> {
        self.try_restart()?;
        loop {
            while !self.run_round()?.done() {}
            if !self.advance_time_slice()? {
                break;
            }
        }
        if self.state.rank() == 0 {
            info!(
                "Fixed point reached in time slice {} after {} rounds",
                self.current_slice, self.state.round
            );
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

#[cfg(test)]
mod test {
    use super::*;
    use crate::comm::run_local_cluster;
    use crate::domain::DomainType;
    use crate::types::FatalError;

    fn curves() -> Vec<IntegralCurve> {
        vec![IntegralCurve::from_seed(
            0,
            &Seed::new([0.5, 0.5, 0.5], 0.0),
            vec![DomainType::spatial(0)],
            0,
        )]
    }

    #[test]
    fn test_unreadable_restart_on_one_rank() {
        let results = run_local_cluster(2, |transport| {
            let rank = transport.rank();
            let mut comm = CommunicationLayer::new(transport, 1);
            let restored = if rank == 0 {
                Err(FatalError::CorruptRestart(String::from("truncated")))
            } else {
                Ok(curves())
            };
            let agreed = agree_on_restored(&mut comm, 1, restored).unwrap();
            // both ranks reach the next collective
            let after = comm.sum_int_across_all_processors(1).unwrap();
            (agreed.is_none(), after)
        });
        assert_eq!(results, vec![(true, 2), (true, 2)]);
    }

    #[test]
    fn test_readable_restart_everywhere() {
        let results = run_local_cluster(2, |transport| {
            let mut comm = CommunicationLayer::new(transport, 1);
            let agreed = agree_on_restored(&mut comm, 1, Ok(curves())).unwrap();
            agreed.map(|c| c.len())
        });
        assert_eq!(results, vec![Some(1), Some(1)]);
    }
}
