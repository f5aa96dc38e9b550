//! Routing primitives shared by the schedulers.
//!
//! A curve that leaves its domain carries the candidate domains whose bounds contain the
//! exit point. Candidates owned by this rank are tested for true containment first; the
//! rest are routed to their owners, duplicating the curve once per destination rank.
//! On arrival exactly the copies that pass the containment test survive.
use crate::context::RunContext;
use crate::curve::{IntegralCurve, Seed, Status, TerminationReason};
use crate::domain::DomainType;
use crate::field::DomainCache;
use crate::traits::FieldProvider;
use crate::types::{CurveId, Rank, Result};
use log::{trace, warn};
use std::collections::BTreeMap;

/// Where an out-of-bounds curve continues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A local candidate contains the curve; it is ready for integration
    Local,
    /// Only candidates owned by other ranks remain
    Remote,
    /// No candidate contains the curve; it has left the mesh
    Exited,
    /// A candidate that might contain the curve could not be loaded
    Failed,
}

/// Outcome of [resolve_out_of_bounds]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    /// Where the curve continues
    pub resolution: Resolution,
    /// Local candidates whose true geometry did not contain the curve
    pub rejected: usize,
}

/// Test the local candidates of an out-of-bounds curve.
///
/// The first local candidate that truly contains the curve becomes its domain. Otherwise
/// the candidate list is pruned to the candidates `is_local` rejects, and if none are
/// left the curve is finished as having exited the mesh, or failed if a candidate could
/// not be loaded.
pub fn resolve_out_of_bounds<P: FieldProvider>(
    curve: &mut IntegralCurve,
    cache: &mut DomainCache<P>,
    is_local: impl Fn(DomainType) -> bool,
) -> Resolved {
    debug_assert_eq!(curve.status, Status::OutOfBounds);
    let candidates = std::mem::take(&mut curve.seed_pt_domain_list);
    let mut remote = vec![];
    let mut rejected = 0;
    let mut load_failed = false;

    for &candidate in &candidates {
        if !is_local(candidate) {
            remote.push(candidate);
            continue;
        }
        match cache.get(candidate) {
            Ok(handle) => {
                if cache
                    .provider()
                    .contains(&*handle, curve.time, &curve.position)
                {
                    trace!("Curve {} continues in local domain {candidate}", curve.id);
                    curve.assign_domain(candidate);
                    return Resolved {
                        resolution: Resolution::Local,
                        rejected,
                    };
                }
                rejected += 1;
            }
            Err(e) => {
                warn!("Curve {} cannot enter domain {candidate}: {e}", curve.id);
                load_failed = true;
            }
        }
    }

    let resolution = if !remote.is_empty() {
        curve.seed_pt_domain_list = remote;
        Resolution::Remote
    } else {
        curve.seed_pt_domain_list = candidates;
        if load_failed {
            curve.fail(TerminationReason::DomainLoadFailure);
            Resolution::Failed
        } else {
            curve.terminate(TerminationReason::ExitedMesh);
            Resolution::Exited
        }
    };
    trace!("Curve {} resolved as {resolution:?}", curve.id);
    Resolved {
        resolution,
        rejected,
    }
}

/// Split out-of-bounds curves by the owners of their candidate domains.
///
/// A curve whose candidates belong to several ranks is duplicated, and every copy keeps
/// only the candidates owned by its destination. Returns the batches together with the
/// number of extra copies created.
pub fn partition_by_destination(
    curves: Vec<IntegralCurve>,
    ctx: &RunContext,
) -> Result<(BTreeMap<Rank, Vec<IntegralCurve>>, usize)> {
    let mut batches: BTreeMap<Rank, Vec<IntegralCurve>> = BTreeMap::new();
    let mut duplicates = 0;
    for curve in curves {
        let mut by_rank: BTreeMap<Rank, Vec<DomainType>> = BTreeMap::new();
        for &candidate in &curve.seed_pt_domain_list {
            by_rank
                .entry(ctx.domain_to_rank(candidate)?)
                .or_default()
                .push(candidate);
        }
        duplicates += by_rank.len().saturating_sub(1);
        for (dest, candidates) in by_rank {
            trace!("Curve {} routed to rank {dest} for {candidates:?}", curve.id);
            let mut copy = curve.clone();
            copy.seed_pt_domain_list = candidates;
            batches.entry(dest).or_default().push(copy);
        }
    }
    Ok((batches, duplicates))
}

/// Seeding outcome on one rank
#[derive(Debug, Default)]
pub struct SeededCurves {
    /// Curves ready for integration on this rank
    pub accepted: Vec<IntegralCurve>,
    /// Curves finished or failed while being seeded
    pub terminated: Vec<IntegralCurve>,
    /// Local candidates that did not truly contain their seed
    pub rejected: usize,
    /// Seeds without any candidate domain
    pub outside_mesh: usize,
    /// Indices of the seeds that became a curve on this rank
    pub claimed: Vec<usize>,
}

/// Create the curves of this rank for a list of seeds.
///
/// `ids` yields one id per seed. A seed becomes a curve on this rank if one of the
/// candidates selected by `is_local` truly contains it.
pub fn seed_curves<P: FieldProvider>(
    seeds: &[Seed],
    ids: impl Iterator<Item = CurveId>,
    rank: Rank,
    cache: &mut DomainCache<P>,
    is_local: impl Fn(usize, DomainType) -> bool,
) -> SeededCurves {
    let mut seeded = SeededCurves::default();
    for (index, (seed, id)) in seeds.iter().zip(ids).enumerate() {
        let candidates = cache
            .provider()
            .candidate_domains(seed.time, &seed.position);
        if candidates.is_empty() {
            seeded.outside_mesh += 1;
            continue;
        }
        let candidates: Vec<DomainType> = candidates
            .into_iter()
            .filter(|&d| is_local(index, d))
            .collect();
        if candidates.is_empty() {
            continue;
        }
        let mut curve = IntegralCurve::from_seed(id, seed, candidates, rank);
        let resolved = resolve_out_of_bounds(&mut curve, cache, |_| true);
        seeded.rejected += resolved.rejected;
        match resolved.resolution {
            Resolution::Local => seeded.accepted.push(curve),
            Resolution::Failed => seeded.terminated.push(curve),
            Resolution::Remote | Resolution::Exited => continue,
        }
        seeded.claimed.push(index);
    }
    seeded
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::domain::{BoundingBox, Partition};
    use crate::field::BoxField;
    use crate::types::Vec3;

    // geometry [0, 5] and [5, 10] along x, bounds overlapping by 1
    fn cache() -> DomainCache<BoxField<impl Fn(f64, &Vec3) -> Vec3>> {
        let field = BoxField::slabs(
            2,
            BoundingBox::new([0.0; 3], [10.0, 1.0, 1.0]),
            1.0,
            |_t: f64, _x: &Vec3| [1.0, 0.0, 0.0],
        );
        DomainCache::new(field, 2)
    }

    fn out_of_bounds_at(x: f64, candidates: Vec<DomainType>) -> IntegralCurve {
        IntegralCurve::from_seed(5, &Seed::new([x, 0.5, 0.5], 0.0), candidates, 0)
    }

    #[test]
    fn test_local_containment_wins() {
        let mut c = cache();
        let mut curve = out_of_bounds_at(5.9, vec![DomainType::spatial(0), DomainType::spatial(1)]);
        let resolved = resolve_out_of_bounds(&mut curve, &mut c, |_| true);
        assert_eq!(resolved.resolution, Resolution::Local);
        assert_eq!(resolved.rejected, 1);
        assert_eq!(curve.domain, DomainType::spatial(1));
        assert_eq!(curve.status, Status::Ok);
    }

    #[test]
    fn test_remote_candidates_remain() {
        let mut c = cache();
        let mut curve = out_of_bounds_at(5.9, vec![DomainType::spatial(0), DomainType::spatial(1)]);
        let resolved = resolve_out_of_bounds(&mut curve, &mut c, |d| d.domain == 0);
        assert_eq!(resolved.resolution, Resolution::Remote);
        assert_eq!(curve.seed_pt_domain_list, vec![DomainType::spatial(1)]);
        assert!(curve.domain.is_unknown());
        assert_eq!(curve.status, Status::OutOfBounds);
    }

    #[test]
    fn test_no_candidate_contains() {
        let mut c = cache();
        let mut curve = out_of_bounds_at(10.5, vec![DomainType::spatial(1)]);
        let resolved = resolve_out_of_bounds(&mut curve, &mut c, |_| true);
        assert_eq!(resolved.resolution, Resolution::Exited);
        assert_eq!(curve.termination, TerminationReason::ExitedMesh);
        assert!(curve.is_terminated());
    }

    #[test]
    fn test_load_failure() {
        let field = BoxField::slabs(
            2,
            BoundingBox::new([0.0; 3], [10.0, 1.0, 1.0]),
            1.0,
            |_t: f64, _x: &Vec3| [1.0, 0.0, 0.0],
        )
        .with_unloadable_domain(DomainType::spatial(1));
        let mut c = DomainCache::new(field, 2);
        let mut curve = out_of_bounds_at(5.9, vec![DomainType::spatial(0), DomainType::spatial(1)]);
        let resolved = resolve_out_of_bounds(&mut curve, &mut c, |_| true);
        assert_eq!(resolved.resolution, Resolution::Failed);
        assert_eq!(curve.status, Status::Error);
        assert_eq!(curve.termination, TerminationReason::DomainLoadFailure);
    }

    #[test]
    fn test_partition_duplicates_per_rank() {
        let ctx = RunContext::partitioned(0, 3, 6, Partition::RoundRobin).unwrap();
        let curves = vec![
            out_of_bounds_at(
                1.0,
                vec![DomainType::spatial(1), DomainType::spatial(2), DomainType::spatial(4)],
            ),
            out_of_bounds_at(2.0, vec![DomainType::spatial(5)]),
        ];
        let (batches, duplicates) = partition_by_destination(curves, &ctx).unwrap();
        assert_eq!(duplicates, 1);
        assert_eq!(batches.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(
            batches[&1][0].seed_pt_domain_list,
            vec![DomainType::spatial(1), DomainType::spatial(4)]
        );
        assert_eq!(batches[&2].len(), 2);
        assert_eq!(batches[&2][0].seed_pt_domain_list, vec![DomainType::spatial(2)]);
        assert_eq!(batches[&2][1].seed_pt_domain_list, vec![DomainType::spatial(5)]);
    }

    #[test]
    fn test_partition_out_of_range() {
        let ctx = RunContext::partitioned(0, 2, 2, Partition::Contiguous).unwrap();
        let curves = vec![out_of_bounds_at(1.0, vec![DomainType::spatial(7)])];
        assert!(partition_by_destination(curves, &ctx).is_err());
    }

    #[test]
    fn test_shuttle_between_contexts() {
        // two ranks simulated in one thread by moving the batches by hand
        let contexts = (0..2)
            .map(|r| RunContext::partitioned(r, 2, 2, Partition::Contiguous).unwrap())
            .collect::<Vec<_>>();
        let mut caches = vec![cache(), cache()];

        let mut curve = out_of_bounds_at(5.9, vec![DomainType::spatial(0), DomainType::spatial(1)]);
        let resolved =
            resolve_out_of_bounds(&mut curve, &mut caches[0], |d| contexts[0].own_domain(d));
        assert_eq!(resolved.resolution, Resolution::Remote);

        let (mut batches, duplicates) =
            partition_by_destination(vec![curve], &contexts[0]).unwrap();
        assert_eq!(duplicates, 0);
        let mut arrived = batches.remove(&1).unwrap();
        assert!(batches.is_empty());

        let resolved =
            resolve_out_of_bounds(&mut arrived[0], &mut caches[1], |d| contexts[1].own_domain(d));
        assert_eq!(resolved.resolution, Resolution::Local);
        assert_eq!(arrived[0].domain, DomainType::spatial(1));
    }

    #[test]
    fn test_seeding() {
        let mut c = cache();
        let seeds = [
            Seed::new([4.9, 0.5, 0.5], 0.0),
            Seed::new([5.5, 0.5, 0.5], 0.0),
            Seed::new([20.0, 0.5, 0.5], 0.0),
        ];
        let seeded = seed_curves(&seeds, 10.., 0, &mut c, |_, d| d.domain == 0);
        assert_eq!(seeded.accepted.len(), 1);
        assert_eq!(seeded.accepted[0].id, 10);
        assert_eq!(seeded.accepted[0].domain, DomainType::spatial(0));
        // 5.5 lies in the bounds of domain 0 but not in its geometry
        assert_eq!(seeded.rejected, 1);
        assert_eq!(seeded.outside_mesh, 1);
        assert_eq!(seeded.claimed, vec![0]);
        assert!(seeded.terminated.is_empty());
    }
}
