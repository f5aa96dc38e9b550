//! Schedulers distributing curve integration over the ranks
mod domain_parallel;
mod rank_state;
mod time_slice;
mod work_queue;

pub use domain_parallel::DomainParallelScheduler;
pub use time_slice::TimeSliceScheduler;
pub use work_queue::{plan_work_transfers, Transfer, WorkQueueScheduler};

use crate::config::{Algorithm, EngineConfig};
use crate::context::RunContext;
use crate::curve::{IntegralCurve, Seed};
use crate::statistics::GlobalStatistics;
use crate::traits::{FieldProvider, OdeStepper, Scheduler, Transport};
use crate::types::Result;
use rank_state::RankState;

/// Create the scheduler selected by `config.algorithm`
pub fn build_scheduler<'a, P, S, T>(
    ctx: RunContext,
    config: EngineConfig,
    provider: P,
    stepper: S,
    transport: T,
) -> Result<Box<dyn Scheduler + 'a>>
where
    P: FieldProvider + 'a,
    S: OdeStepper + 'a,
    T: Transport + 'a,
{
    let algorithm = config.algorithm;
    let state = RankState::new(ctx, config, provider, stepper, transport)?;
    Ok(match algorithm {
        Algorithm::DomainParallel => Box::new(DomainParallelScheduler::new(state)),
        Algorithm::WorkQueue => Box::new(WorkQueueScheduler::new(state)),
        Algorithm::TimeSlice => Box::new(TimeSliceScheduler::new(state)),
    })
}

/// Integrate `seeds` to the global fixed point. Collective.
///
/// Returns the curves terminated on this rank, sorted by id, and the statistics of the
/// whole run.
pub fn advect_seeds<P, S, T>(
    ctx: RunContext,
    config: EngineConfig,
    provider: P,
    stepper: S,
    transport: T,
    seeds: &[Seed],
) -> Result<(Vec<IntegralCurve>, GlobalStatistics)>
where
    P: FieldProvider,
    S: OdeStepper,
    T: Transport,
{
    let mut scheduler = build_scheduler(ctx, config, provider, stepper, transport)?;
    scheduler.add_work(seeds)?;
    scheduler.execute()?;
    let curves = scheduler.terminated_curves()?;
    let statistics = scheduler.global_statistics().cloned().unwrap_or_default();
    Ok((curves, statistics))
}
