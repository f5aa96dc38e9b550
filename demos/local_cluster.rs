use parcurve::advect::Rk4Stepper;
use parcurve::comm::run_local_cluster;
use parcurve::config::{Algorithm, EngineConfig};
use parcurve::context::RunContext;
use parcurve::curve::Seed;
use parcurve::domain::{BoundingBox, Partition};
use parcurve::field::BoxField;
use parcurve::scheduler::advect_seeds;
use parcurve::traits::Transport;
use parcurve::types::Vec3;

fn main() {
    let num_ranks = 4;
    let num_domains = 8;

    // Eight slabs of a swirling flow through the box [0, 8] x [0, 1] x [0, 1]
    let field = || {
        BoxField::slabs(
            num_domains,
            BoundingBox::new([0.0; 3], [8.0, 1.0, 1.0]),
            0.1,
            |_t: f64, x: &Vec3| [1.0, 0.5 * (x[2] - 0.5), 0.5 * (0.5 - x[1])],
        )
    };
    let seeds = (0..10)
        .map(|i| Seed::new([0.05, 0.3 + 0.04 * i as f64, 0.5], 0.0))
        .collect::<Vec<_>>();

    for algorithm in [Algorithm::DomainParallel, Algorithm::WorkQueue] {
        let mut config = EngineConfig {
            algorithm,
            partition: Partition::RoundRobin,
            ..Default::default()
        };
        config.integration.step_size = 0.05;
        config.integration.record_trajectory = true;

        let results = run_local_cluster(num_ranks, |transport| {
            let rank = transport.rank();
            let ctx = RunContext::partitioned(rank, num_ranks, num_domains, config.partition)
                .unwrap();
            advect_seeds(ctx, config.clone(), field(), Rk4Stepper, transport, &seeds).unwrap()
        });

        println!("{algorithm:?}");
        for (rank, (curves, _)) in results.iter().enumerate() {
            for c in curves {
                println!(
                    "  rank {rank}: curve {} ended at [{:.3}, {:.3}, {:.3}] after {} steps ({:?}), \
                     {} points recorded",
                    c.id,
                    c.position[0],
                    c.position[1],
                    c.position[2],
                    c.steps_taken,
                    c.termination,
                    c.trajectory.len()
                );
            }
        }
        let stats = &results[0].1;
        println!(
            "  {} rounds, {} curves sent, {} lost",
            stats.totals.rounds, stats.totals.curves_sent, stats.lost_curves
        );
    }
}
