//! Run statistics
use crate::comm::CommunicationLayer;
use crate::traits::Transport;
use crate::types::Result;
use log::info;
use std::time::Duration;

/// Counters and timers of one rank
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistics {
    /// Rounds run
    pub rounds: usize,
    /// Calls to the advector
    pub advect_calls: usize,
    /// Integration steps taken
    pub steps_taken: usize,
    /// Domains loaded
    pub domain_loads: usize,
    /// Domains evicted from the cache
    pub domain_purges: usize,
    /// Curves sent to other ranks
    pub curves_sent: usize,
    /// Curves received from other ranks
    pub curves_received: usize,
    /// Messages sent
    pub messages_sent: usize,
    /// Extra copies made when routing a curve to several ranks
    pub duplicates_created: usize,
    /// Arrived copies that no local domain contained
    pub discarded_on_arrival: usize,
    /// Candidate domains that failed the containment test
    pub rejected_candidates: usize,
    /// Seeds that no rank could place in a domain, counted on rank 0 only
    pub seeds_outside_mesh: usize,
    /// Curves created from seeds or restored on this rank
    pub seeded_curves: usize,
    /// Curves finished on this rank
    pub finished: usize,
    /// Curves failed on this rank
    pub errors: usize,
    /// Time slices completed
    pub time_slices: usize,
    /// Wall-clock time spent integrating
    pub advect_time: Duration,
    /// Wall-clock time spent communicating
    pub comm_time: Duration,
}

/// Statistics summed over all ranks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalStatistics {
    /// Sums of the counters of all ranks; `time_slices` and the timers are maxima
    pub totals: Statistics,
    /// Largest advection time of any rank, in seconds
    pub max_advect_seconds: f64,
    /// Largest communication time of any rank, in seconds
    pub max_comm_seconds: f64,
    /// Arrivals discarded beyond the copies made for shared boundaries
    pub lost_curves: usize,
}

impl Statistics {
    fn counters(&self) -> [usize; 15] {
        [
            self.rounds,
            self.advect_calls,
            self.steps_taken,
            self.domain_loads,
            self.domain_purges,
            self.curves_sent,
            self.curves_received,
            self.messages_sent,
            self.duplicates_created,
            self.discarded_on_arrival,
            self.rejected_candidates,
            self.seeds_outside_mesh,
            self.seeded_curves,
            self.finished,
            self.errors,
        ]
    }

    fn from_counters(c: &[i64]) -> Self {
        let get = |i: usize| c.get(i).map_or(0, |&v| v.max(0) as usize);
        Self {
            rounds: get(0),
            advect_calls: get(1),
            steps_taken: get(2),
            domain_loads: get(3),
            domain_purges: get(4),
            curves_sent: get(5),
            curves_received: get(6),
            messages_sent: get(7),
            duplicates_created: get(8),
            discarded_on_arrival: get(9),
            rejected_candidates: get(10),
            seeds_outside_mesh: get(11),
            seeded_curves: get(12),
            finished: get(13),
            errors: get(14),
            ..Default::default()
        }
    }

    /// Combine the statistics of all ranks and log a summary on rank 0. Collective.
    pub fn report<T: Transport>(
        &self,
        comm: &mut CommunicationLayer<T>,
    ) -> Result<GlobalStatistics> {
        let local = self.counters().map(|v| v as i64);
        let sums = comm.sum_int_array_across_all_processors(&local)?;
        let mut totals = Self::from_counters(&sums);
        totals.rounds = comm.max_int_across_all_processors(self.rounds as i64)? as usize;
        totals.time_slices = comm.max_int_across_all_processors(self.time_slices as i64)? as usize;
        let max_advect_seconds = comm.unify_maximum_value(self.advect_time.as_secs_f64())?;
        let max_comm_seconds = comm.unify_maximum_value(self.comm_time.as_secs_f64())?;
        totals.advect_time = Duration::from_secs_f64(max_advect_seconds);
        totals.comm_time = Duration::from_secs_f64(max_comm_seconds);

        let global = GlobalStatistics {
            lost_curves: totals
                .discarded_on_arrival
                .saturating_sub(totals.duplicates_created),
            totals,
            max_advect_seconds,
            max_comm_seconds,
        };
        if comm.rank() == 0 {
            global.log();
        }
        Ok(global)
    }
}

impl GlobalStatistics {
    fn log(&self) {
        let t = &self.totals;
        info!(
            "Advected {} curves in {} rounds: {} finished, {} failed, {} lost",
            t.seeded_curves, t.rounds, t.finished, t.errors, self.lost_curves
        );
        info!("{} seeds outside the mesh", t.seeds_outside_mesh);
        info!(
            "{} steps in {} advect calls, {} domain loads, {} purges",
            t.steps_taken, t.advect_calls, t.domain_loads, t.domain_purges
        );
        info!(
            "{} curves sent in {} messages, {} duplicates, {} discarded on arrival",
            t.curves_sent, t.messages_sent, t.duplicates_created, t.discarded_on_arrival
        );
        info!(
            "Slowest rank: {:.3}s advecting, {:.3}s communicating",
            self.max_advect_seconds, self.max_comm_seconds
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::comm::{run_local_cluster, SerialTransport};
    use approx::assert_relative_eq;

    #[test]
    fn test_report_sums_and_maxima() {
        let results = run_local_cluster(3, |transport| {
            let rank = transport.rank();
            let mut comm = CommunicationLayer::new(transport, 1);
            let stats = Statistics {
                rounds: 4 + rank,
                steps_taken: 10 * rank,
                duplicates_created: 1,
                discarded_on_arrival: 2,
                finished: rank,
                advect_time: Duration::from_millis(100 * rank as u64),
                ..Default::default()
            };
            stats.report(&mut comm).unwrap()
        });
        for global in results {
            assert_eq!(global.totals.rounds, 6);
            assert_eq!(global.totals.steps_taken, 30);
            assert_eq!(global.totals.finished, 3);
            assert_eq!(global.lost_curves, 3);
            assert_relative_eq!(global.max_advect_seconds, 0.2);
        }
    }

    #[test]
    fn test_serial_report() {
        let mut comm = CommunicationLayer::new(SerialTransport::new(), 1);
        let stats = Statistics {
            duplicates_created: 3,
            discarded_on_arrival: 1,
            ..Default::default()
        };
        let global = stats.report(&mut comm).unwrap();
        assert_eq!(global.lost_curves, 0);
        assert_eq!(global.totals.duplicates_created, 3);
    }
}
