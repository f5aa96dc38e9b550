use approx::assert_relative_eq;
use parcurve::advect::EulerStepper;
use parcurve::comm::run_local_cluster;
use parcurve::config::{Algorithm, EngineConfig};
use parcurve::context::RunContext;
use parcurve::curve::{IntegralCurve, Seed, Status, TerminationReason};
use parcurve::domain::{BoundingBox, DomainType, Partition};
use parcurve::field::BoxField;
use parcurve::scheduler::{advect_seeds, build_scheduler};
use parcurve::statistics::GlobalStatistics;
use parcurve::traits::Transport;
use parcurve::types::Vec3;
use rand::{Rng, SeedableRng};

/// Two domains with geometry [0, 5] and [5, 10] along x whose bounds overlap by 1
fn two_slabs() -> BoxField<impl Fn(f64, &Vec3) -> Vec3> {
    BoxField::slabs(
        2,
        BoundingBox::new([0.0; 3], [10.0, 1.0, 1.0]),
        1.0,
        |_t: f64, _x: &Vec3| [1.0, 0.0, 0.0],
    )
}

fn unit_step_config(max_steps: usize) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.integration.step_size = 1.0;
    config.integration.max_steps_per_call = 10;
    config.integration.termination.max_steps = Some(max_steps);
    config
}

fn run_two_slabs(
    config: EngineConfig,
    seeds: &[Seed],
) -> Vec<(Vec<IntegralCurve>, GlobalStatistics)> {
    run_local_cluster(2, |transport| {
        let ctx =
            RunContext::partitioned(transport.rank(), 2, 2, Partition::Contiguous).unwrap();
        advect_seeds(ctx, config.clone(), two_slabs(), EulerStepper, transport, seeds).unwrap()
    })
}

#[test]
fn test_curve_crosses_shared_boundary() {
    // the seed counts as the first point, so two steps end the curve at x = 6.9
    let results = run_two_slabs(unit_step_config(2), &[Seed::new([4.9, 0.5, 0.5], 0.0)]);

    assert!(results[0].0.is_empty());
    let curves = &results[1].0;
    assert_eq!(curves.len(), 1);
    let curve = &curves[0];
    assert_eq!(curve.id, 0);
    assert_eq!(curve.status, Status::Finished);
    assert_eq!(curve.termination, TerminationReason::MaxSteps);
    assert_eq!(curve.domain, DomainType::spatial(1));
    assert_relative_eq!(curve.position[0], 6.9, epsilon = 1e-12);
    assert_eq!(curve.steps_taken, 2);
    assert_eq!(curve.originating_rank, 0);

    for (_, stats) in &results {
        assert_eq!(stats.totals.rounds, 2);
        assert_eq!(stats.totals.finished, 1);
        assert_eq!(stats.totals.curves_sent, 1);
        assert_eq!(stats.totals.duplicates_created, 0);
        assert_eq!(stats.totals.discarded_on_arrival, 0);
        assert_eq!(stats.lost_curves, 0);
    }
}

#[test]
fn test_seed_on_shared_face() {
    let results = run_two_slabs(unit_step_config(2), &[Seed::new([5.0, 0.5, 0.5], 0.0)]);

    assert!(results[0].0.is_empty());
    let curves = &results[1].0;
    assert_eq!(curves.len(), 1);
    assert_eq!(curves[0].domain, DomainType::spatial(1));
    assert_relative_eq!(curves[0].position[0], 7.0, epsilon = 1e-12);
    for (_, stats) in &results {
        assert_eq!(stats.totals.seeded_curves, 1);
        assert_eq!(stats.totals.finished, 1);
        assert_eq!(stats.totals.seeds_outside_mesh, 0);
    }
}

#[test]
fn test_return_to_originator() {
    let config = EngineConfig {
        return_to_originator: true,
        ..unit_step_config(2)
    };
    let results = run_two_slabs(config, &[Seed::new([4.9, 0.5, 0.5], 0.0)]);
    assert_eq!(results[0].0.len(), 1);
    assert!(results[1].0.is_empty());
    assert_relative_eq!(results[0].0[0].position[0], 6.9, epsilon = 1e-12);
}

#[test]
fn test_four_seeds_cross_once() {
    let seeds = (0..4)
        .map(|i| Seed::new([1.0 + i as f64, 0.2 + 0.2 * i as f64, 0.5], 0.0))
        .collect::<Vec<_>>();
    let mut config = unit_step_config(100);
    config.integration.step_size = 0.5;
    let results = run_two_slabs(config, &seeds);

    assert!(results[0].0.is_empty());
    let curves = &results[1].0;
    assert_eq!(curves.iter().map(|c| c.id).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    for c in curves {
        assert_eq!(c.termination, TerminationReason::ExitedMesh);
        assert!(c.position[0] > 10.0);
    }
    let stats = &results[0].1;
    assert_eq!(stats.totals.curves_sent, 4);
    assert_eq!(stats.totals.finished, 4);
    assert_eq!(stats.lost_curves, 0);
}

/// Three unit slabs along x whose bounds overlap by 0.6, so an exit point can lie in
/// the bounds of three domains at once
fn three_slabs() -> BoxField<impl Fn(f64, &Vec3) -> Vec3> {
    BoxField::slabs(
        3,
        BoundingBox::new([0.0; 3], [3.0, 1.0, 1.0]),
        0.6,
        |_t: f64, x: &Vec3| [1.0, 0.1 * (0.5 - x[1]), 0.0],
    )
}

fn run_three_slabs(
    config: EngineConfig,
    seeds: &[Seed],
) -> Vec<(Vec<IntegralCurve>, GlobalStatistics)> {
    run_local_cluster(3, |transport| {
        let ctx =
            RunContext::partitioned(transport.rank(), 3, 3, Partition::RoundRobin).unwrap();
        advect_seeds(ctx, config.clone(), three_slabs(), EulerStepper, transport, seeds).unwrap()
    })
}

#[test]
fn test_duplicate_is_discarded() {
    let mut config = unit_step_config(100);
    config.integration.step_size = 0.6;
    let results = run_three_slabs(config, &[Seed::new([0.9, 0.5, 0.5], 0.0)]);

    // 1.5 lies in the bounds of all three domains; ranks 1 and 2 both get a copy
    let stats = &results[0].1;
    assert_eq!(stats.totals.duplicates_created, 1);
    assert_eq!(stats.totals.discarded_on_arrival, 1);
    assert_eq!(stats.lost_curves, 0);

    let curves = results.iter().flat_map(|(c, _)| c.iter()).collect::<Vec<_>>();
    assert_eq!(curves.len(), 1);
    assert_eq!(curves[0].termination, TerminationReason::ExitedMesh);
    assert_relative_eq!(curves[0].position[0], 3.3, epsilon = 1e-12);
}

#[test]
fn test_conservation() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let mut seeds = (0..40)
        .map(|_| {
            Seed::new(
                [rng.gen_range(0.0..2.95), rng.gen_range(0.1..0.9), 0.5],
                0.0,
            )
        })
        .collect::<Vec<_>>();
    // outside every bounds, then inside the bounds of a domain but not its geometry
    seeds.push(Seed::new([5.0, 0.5, 0.5], 0.0));
    seeds.push(Seed::new([2.0, 1.5, 0.5], 0.0));
    let mut config = unit_step_config(6);
    config.integration.step_size = 0.35;
    config.integration.max_steps_per_call = 2;
    config.max_count = 5;

    for algorithm in [Algorithm::DomainParallel, Algorithm::WorkQueue] {
        config.algorithm = algorithm;
        let results = run_three_slabs(config.clone(), &seeds);
        let stats = &results[0].1;
        for (_, other) in &results {
            assert_eq!(other, stats);
        }
        let t = &stats.totals;
        let curves = results.iter().map(|(c, _)| c.len()).sum::<usize>();
        assert_eq!(curves, t.finished + t.errors);
        assert_eq!(
            t.finished + t.errors + t.discarded_on_arrival,
            t.seeded_curves + t.duplicates_created
        );
        assert_eq!(t.seeds_outside_mesh, 2);
        assert_eq!(t.seeded_curves, seeds.len() - 2);
        assert_eq!(t.seeded_curves + t.seeds_outside_mesh, seeds.len());
        assert_eq!(stats.lost_curves, 0);
        for (c, _) in &results {
            assert!(c.iter().all(|c| c.is_terminated()));
        }
    }
}

#[test]
fn test_domain_parallel_without_matching_transport() {
    let results = run_local_cluster(2, |transport| {
        let ctx = RunContext::partitioned(0, 1, 2, Partition::Contiguous).unwrap();
        build_scheduler(ctx, EngineConfig::default(), two_slabs(), EulerStepper, transport)
            .is_err()
    });
    assert_eq!(results, vec![true, true]);
}
