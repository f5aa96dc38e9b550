//! Scheduling strategies
use crate::curve::{CurveHandle, IntegralCurve, Seed};
use crate::statistics::{GlobalStatistics, Statistics};
use crate::types::Result;

/// Summary of one round of the round loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoundOutcome {
    /// Round number, starting at 1
    pub round: usize,
    /// Curves integrated locally this round
    pub advected: usize,
    /// Active and out-of-bounds curves on this rank at the reduction
    pub local_active: usize,
    /// Sum of `local_active` over all ranks
    pub global_active: usize,
    /// Curves sent to other ranks
    pub sent: usize,
    /// Curves received from other ranks
    pub received: usize,
}

impl RoundOutcome {
    /// Whether the global fixed point was reached
    pub fn done(&self) -> bool {
        self.global_active == 0
    }
}

/// A strategy for distributing curve integration over the ranks.
///
/// All methods marked collective must be called by every rank in the same order.
pub trait Scheduler {
    /// Add seed points. Collective: every rank passes the same seeds.
    fn add_work(&mut self, seeds: &[Seed]) -> Result<()>;

    /// Run one round: integrate, reduce the active count and route curves. Collective.
    fn run_round(&mut self) -> Result<RoundOutcome>;

    /// Decide where a curve that left its domain goes next
    fn handle_out_of_bounds(&mut self, handle: CurveHandle) -> Result<()>;

    /// Reduce the number of active curves over all ranks. Collective.
    fn check_global_done(&mut self) -> Result<bool>;

    /// Run rounds until the global fixed point. Collective.
    fn execute(&mut self) -> Result<()>;

    /// Hand over the terminated curves, sorted by id
    fn terminated_curves(&mut self) -> Result<Vec<IntegralCurve>>;

    /// Counters of this rank
    fn statistics(&self) -> &Statistics;

    /// Counters over all ranks, available after `execute`
    fn global_statistics(&self) -> Option<&GlobalStatistics>;
}
