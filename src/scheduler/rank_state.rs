//! State and round phases shared by every scheduler
use crate::advect::Advector;
use crate::comm::CommunicationLayer;
use crate::config::EngineConfig;
use crate::context::RunContext;
use crate::curve::{CurveArena, CurveHandle, IntegralCurve, Seed, Status, TerminationReason};
use crate::field::DomainCache;
use crate::routing::{partition_by_destination, resolve_out_of_bounds, seed_curves, Resolution};
use crate::statistics::{GlobalStatistics, Statistics};
use crate::traits::{FieldProvider, OdeStepper, Transport};
use crate::types::{FatalError, Rank, Result};
use itertools::Itertools;
use log::{debug, warn};
use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

/// Which domains a rank may integrate curves in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Locality {
    /// The domains the ownership map assigns to the rank
    Owned,
    /// Any domain, loaded on demand
    Any,
}

pub(crate) struct RankState<P: FieldProvider, S: OdeStepper, T: Transport> {
    pub ctx: RunContext,
    pub config: EngineConfig,
    pub cache: DomainCache<P>,
    pub advector: Advector<S>,
    pub comm: CommunicationLayer<T>,
    pub arena: CurveArena,
    pub active: VecDeque<CurveHandle>,
    pub oob: Vec<CurveHandle>,
    pub terminated: Vec<CurveHandle>,
    pub stats: Statistics,
    pub round: usize,
    pub last_global_active: usize,
    pub global_stats: Option<GlobalStatistics>,
}

impl<P: FieldProvider, S: OdeStepper, T: Transport> RankState<P, S, T> {
    pub fn new(
        mut ctx: RunContext,
        config: EngineConfig,
        provider: P,
        stepper: S,
        transport: T,
    ) -> Result<Self> {
        config.validate()?;
        if ctx.rank() != transport.rank() || ctx.size() != transport.size() {
            return Err(FatalError::InvalidConfig(format!(
                "context of rank {} of {} used with transport of rank {} of {}",
                ctx.rank(),
                ctx.size(),
                transport.rank(),
                transport.size()
            )));
        }
        if provider.num_domains() > ctx.ownership().num_domains() {
            ctx.ownership_mut().extend(provider.num_domains());
        }
        Ok(Self {
            ctx,
            cache: DomainCache::new(provider, config.max_cached_domains),
            advector: Advector::new(stepper, config.integration),
            comm: CommunicationLayer::new(transport, config.num_recvs),
            config,
            arena: CurveArena::new(),
            active: VecDeque::new(),
            oob: vec![],
            terminated: vec![],
            stats: Statistics::default(),
            round: 0,
            last_global_active: 0,
            global_stats: None,
        })
    }

    pub fn rank(&self) -> Rank {
        self.ctx.rank()
    }

    /// Curves that still need work on this rank
    pub fn local_active(&self) -> usize {
        self.active.len() + self.oob.len()
    }

    /// Create the curves of this rank from seeds given to every rank. Collective.
    pub fn add_seeds(&mut self, seeds: &[Seed], locality: Locality) -> Result<Vec<CurveHandle>> {
        let ids = self.ctx.allocate_ids(seeds.len());
        let (rank, size) = (self.ctx.rank(), self.ctx.size());
        let ctx = &self.ctx;
        let seeded = seed_curves(seeds, ids, rank, &mut self.cache, |index, domain| {
            match locality {
                Locality::Owned => ctx.own_domain(domain),
                Locality::Any => index % size == rank,
            }
        });
        self.stats.rejected_candidates += seeded.rejected;
        self.stats.seeded_curves += seeded.accepted.len() + seeded.terminated.len();
        debug!(
            "Rank {rank} accepted {} of {} seeds",
            seeded.accepted.len(),
            seeds.len()
        );

        // seeds inside some bounds but no geometry are claimed by no rank
        let mut claims = vec![0; seeds.len()];
        for &index in &seeded.claimed {
            claims[index] = 1;
        }
        let start = Instant::now();
        let claims = self.comm.sum_int_array_across_all_processors(&claims)?;
        self.stats.comm_time += start.elapsed();
        let unclaimed = claims.iter().filter(|&&c| c == 0).count();
        if rank == 0 {
            if unclaimed > seeded.outside_mesh {
                warn!(
                    "{} seeds lie within domain bounds but inside no domain",
                    unclaimed - seeded.outside_mesh
                );
            }
            self.stats.seeds_outside_mesh += unclaimed;
        }

        let mut accepted = Vec::with_capacity(seeded.accepted.len());
        for curve in seeded.accepted {
            let handle = self.arena.insert(curve);
            self.active.push_back(handle);
            accepted.push(handle);
        }
        for curve in seeded.terminated {
            let handle = self.arena.insert(curve);
            self.finish(handle)?;
        }
        Ok(accepted)
    }

    /// Advect up to `max_count` curves from the active queue.
    ///
    /// Returns the number of advect calls and the curves that left their domain.
    pub fn advect_active(&mut self) -> Result<(usize, Vec<CurveHandle>)> {
        let start = Instant::now();
        let mut advected = 0;
        let mut left = vec![];
        while advected < self.config.max_count {
            let Some(handle) = self.active.pop_front() else {
                break;
            };
            let domain = self.arena.get(handle)?.domain;
            let field = match self.cache.get(domain) {
                Ok(field) => field,
                Err(e) => {
                    warn!("Rank {} failed to load domain {domain}: {e}", self.rank());
                    self.arena
                        .get_mut(handle)?
                        .fail(TerminationReason::DomainLoadFailure);
                    self.finish(handle)?;
                    continue;
                }
            };
            let curve = self.arena.get_mut(handle)?;
            let steps = self.advector.advect(curve, self.cache.provider(), &*field);
            let status = curve.status;
            self.stats.steps_taken += steps;
            self.stats.advect_calls += 1;
            advected += 1;
            match status {
                Status::Ok => self.active.push_back(handle),
                Status::OutOfBounds => left.push(handle),
                Status::Finished | Status::Error => self.finish(handle)?,
            }
        }
        self.stats.advect_time += start.elapsed();
        Ok((advected, left))
    }

    /// Move a curve to the terminated queue
    pub fn finish(&mut self, handle: CurveHandle) -> Result<()> {
        match self.arena.get(handle)?.status {
            Status::Error => self.stats.errors += 1,
            _ => self.stats.finished += 1,
        }
        self.terminated.push(handle);
        Ok(())
    }

    /// Resolve an out-of-bounds curve against the local domains and queue it accordingly
    pub fn resolve_locally(&mut self, handle: CurveHandle, locality: Locality) -> Result<()> {
        let ctx = &self.ctx;
        let curve = self.arena.get_mut(handle)?;
        let resolved = resolve_out_of_bounds(curve, &mut self.cache, |domain| match locality {
            Locality::Owned => ctx.own_domain(domain),
            Locality::Any => true,
        });
        self.stats.rejected_candidates += resolved.rejected;
        match resolved.resolution {
            Resolution::Local => self.active.push_back(handle),
            Resolution::Remote => self.oob.push(handle),
            Resolution::Exited | Resolution::Failed => self.finish(handle)?,
        }
        Ok(())
    }

    /// Sum the active counts of all ranks. Collective.
    pub fn reduce_active(&mut self) -> Result<usize> {
        let local = self.local_active() as i64;
        let start = Instant::now();
        let global = self.comm.sum_int_across_all_processors(local)?;
        self.stats.comm_time += start.elapsed();
        self.last_global_active = global.max(0) as usize;
        Ok(self.last_global_active)
    }

    /// Remove curves from this rank
    pub fn take_curves(&mut self, handles: Vec<CurveHandle>) -> Result<Vec<IntegralCurve>> {
        let mut curves = Vec::with_capacity(handles.len());
        for handle in handles {
            curves.push(self.arena.remove(handle)?);
        }
        Ok(curves)
    }

    /// Route the out-of-bounds queue to the owners of the candidate domains and accept
    /// what arrives. Collective.
    ///
    /// Returns the number of curves sent and received.
    pub fn route_out_of_bounds(&mut self) -> Result<(usize, usize)> {
        let handles = std::mem::take(&mut self.oob);
        let curves = self.take_curves(handles)?;
        let (batches, duplicates) = partition_by_destination(curves, &self.ctx)?;
        self.stats.duplicates_created += duplicates;
        let (sent, arrived) = self.exchange(batches)?;
        let received = arrived.len();
        self.accept_arrivals(arrived, Locality::Owned)?;
        Ok((sent, received))
    }

    /// Send batches of curves and wait for this rank's share. Collective.
    pub fn exchange(
        &mut self,
        batches: BTreeMap<Rank, Vec<IntegralCurve>>,
    ) -> Result<(usize, Vec<IntegralCurve>)> {
        let start = Instant::now();
        let exchange = self.comm.exchange_curves(batches)?;
        self.stats.comm_time += start.elapsed();
        self.stats.curves_sent += exchange.sent;
        self.stats.messages_sent += exchange.messages;
        self.stats.curves_received += exchange.received.len();
        Ok((exchange.sent, exchange.received))
    }

    /// Queue curves that arrived from other ranks.
    ///
    /// Curves with a domain are ready for integration. Out-of-bounds curves are kept
    /// only if a local candidate truly contains them.
    pub fn accept_arrivals(
        &mut self,
        curves: Vec<IntegralCurve>,
        locality: Locality,
    ) -> Result<()> {
        for curve in curves {
            let handle = self.arena.insert(curve);
            if self.arena.get(handle)?.status == Status::Ok {
                self.active.push_back(handle);
                continue;
            }
            let ctx = &self.ctx;
            let curve = self.arena.get_mut(handle)?;
            let resolved = resolve_out_of_bounds(curve, &mut self.cache, |domain| match locality {
                Locality::Owned => ctx.own_domain(domain),
                Locality::Any => true,
            });
            match resolved.resolution {
                Resolution::Local => self.active.push_back(handle),
                Resolution::Failed => self.finish(handle)?,
                Resolution::Remote | Resolution::Exited => {
                    let curve = self.arena.remove(handle)?;
                    debug!("Rank {} discards curve {}", self.rank(), curve.id);
                    self.stats.discarded_on_arrival += 1;
                }
            }
        }
        Ok(())
    }

    /// Drop every curve of this rank together with their counts
    pub fn clear(&mut self) {
        self.arena = CurveArena::new();
        self.active.clear();
        self.oob.clear();
        self.terminated.clear();
        self.stats.seeded_curves = 0;
        self.stats.finished = 0;
        self.stats.errors = 0;
        self.stats.discarded_on_arrival = 0;
        self.stats.duplicates_created = 0;
    }

    /// Bring the cache counters into the statistics
    pub fn sync_cache_stats(&mut self) {
        self.stats.domain_loads = self.cache.loads();
        self.stats.domain_purges = self.cache.purges();
    }

    /// Optionally return curves to their originating ranks, then combine the statistics.
    /// Collective.
    pub fn finish_execute(&mut self) -> Result<()> {
        if self.config.return_to_originator {
            let handles = std::mem::take(&mut self.terminated);
            let curves = self.take_curves(handles)?;
            let mut batches: BTreeMap<Rank, Vec<IntegralCurve>> = BTreeMap::new();
            for curve in curves {
                batches.entry(curve.originating_rank).or_default().push(curve);
            }
            let start = Instant::now();
            let exchange = self.comm.exchange_results(batches)?;
            self.stats.comm_time += start.elapsed();
            debug!(
                "Rank {} holds {} curves it seeded",
                self.rank(),
                exchange.received.len()
            );
            for curve in exchange.received {
                let handle = self.arena.insert(curve);
                self.terminated.push(handle);
            }
        }
        self.sync_cache_stats();
        self.global_stats = Some(self.stats.report(&mut self.comm)?);
        Ok(())
    }

    /// Hand over the terminated curves sorted by id and domain
    pub fn take_terminated(&mut self) -> Result<Vec<IntegralCurve>> {
        let handles = std::mem::take(&mut self.terminated);
        Ok(self
            .take_curves(handles)?
            .into_iter()
            .sorted_by_key(|c| (c.id, c.domain))
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::advect::EulerStepper;
    use crate::comm::SerialTransport;
    use crate::domain::{BoundingBox, DomainType};
    use crate::field::BoxField;
    use crate::types::Vec3;

    fn state(
        max_count: usize,
    ) -> RankState<BoxField<impl Fn(f64, &Vec3) -> Vec3>, EulerStepper, SerialTransport> {
        let field = BoxField::slabs(
            2,
            BoundingBox::new([0.0; 3], [10.0, 1.0, 1.0]),
            1.0,
            |_t: f64, _x: &Vec3| [1.0, 0.0, 0.0],
        );
        let mut config = EngineConfig {
            max_count,
            ..Default::default()
        };
        config.integration.step_size = 1.0;
        config.integration.max_steps_per_call = 1;
        config.integration.termination.max_steps = Some(3);
        RankState::new(
            RunContext::serial(1),
            config,
            field,
            EulerStepper,
            SerialTransport::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_ownership_map_grows_with_provider() {
        let s = state(10);
        assert_eq!(s.ctx.ownership().num_domains(), 2);
        assert!(s.ctx.own_domain(DomainType::spatial(1)));
    }

    #[test]
    fn test_round_budget() {
        let mut s = state(2);
        let seeds = [
            Seed::new([0.5, 0.5, 0.5], 0.0),
            Seed::new([1.5, 0.5, 0.5], 0.0),
            Seed::new([2.5, 0.5, 0.5], 0.0),
        ];
        assert_eq!(s.add_seeds(&seeds, Locality::Owned).unwrap().len(), 3);
        let (advected, left) = s.advect_active().unwrap();
        assert_eq!(advected, 2);
        assert!(left.is_empty());
        assert_eq!(s.active.len(), 3);
        assert_eq!(s.stats.steps_taken, 2);
    }

    #[test]
    fn test_leaving_curves_are_returned() {
        let mut s = state(10);
        s.add_seeds(&[Seed::new([4.5, 0.5, 0.5], 0.0)], Locality::Owned)
            .unwrap();
        let (_, left) = s.advect_active().unwrap();
        assert_eq!(left.len(), 1);
        // both domains live on this rank, so the curve continues locally
        s.resolve_locally(left[0], Locality::Owned).unwrap();
        assert_eq!(s.active.len(), 1);
        assert_eq!(
            s.arena.get(left[0]).unwrap().domain,
            DomainType::spatial(1)
        );
        assert_eq!(s.stats.rejected_candidates, 1);
    }

    #[test]
    fn test_unclaimed_seeds_are_counted() {
        let mut s = state(10);
        let seeds = [
            Seed::new([0.5, 0.5, 0.5], 0.0),
            // in the bounds of domain 0 only
            Seed::new([0.5, 1.5, 0.5], 0.0),
            Seed::new([20.0, 0.5, 0.5], 0.0),
        ];
        assert_eq!(s.add_seeds(&seeds, Locality::Owned).unwrap().len(), 1);
        assert_eq!(s.stats.seeded_curves, 1);
        assert_eq!(s.stats.seeds_outside_mesh, 2);
    }

    #[test]
    fn test_clear_resets_curve_counts() {
        let mut s = state(10);
        s.add_seeds(&[Seed::new([9.5, 0.5, 0.5], 0.0)], Locality::Owned)
            .unwrap();
        let (_, left) = s.advect_active().unwrap();
        s.resolve_locally(left[0], Locality::Owned).unwrap();
        assert_eq!((s.stats.seeded_curves, s.stats.finished), (1, 1));
        s.clear();
        assert!(s.arena.is_empty());
        assert_eq!((s.stats.seeded_curves, s.stats.finished, s.stats.errors), (0, 0, 0));
    }

    #[test]
    fn test_discarded_arrival() {
        let mut s = state(10);
        let stray = IntegralCurve::from_seed(
            9,
            &Seed::new([10.5, 0.5, 0.5], 0.0),
            vec![DomainType::spatial(1)],
            0,
        );
        s.accept_arrivals(vec![stray], Locality::Owned).unwrap();
        assert_eq!(s.stats.discarded_on_arrival, 1);
        assert!(s.arena.is_empty());
    }

    #[test]
    fn test_terminated_are_sorted() {
        let mut s = state(10);
        let seeds = [
            Seed::new([6.5, 0.5, 0.5], 0.0),
            Seed::new([0.5, 0.5, 0.5], 0.0),
        ];
        s.add_seeds(&seeds, Locality::Owned).unwrap();
        for _ in 0..3 {
            s.advect_active().unwrap();
        }
        s.terminated.reverse();
        let curves = s.take_terminated().unwrap();
        assert_eq!(curves.iter().map(|c| c.id).collect::<Vec<_>>(), vec![0, 1]);
        assert!(s.arena.is_empty());
    }
}
