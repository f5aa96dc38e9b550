//? mpirun -n {{NPROCESSES}} --features "mpi"

#[cfg(feature = "mpi")]
use mpi::{environment::Universe, topology::Communicator};
#[cfg(feature = "mpi")]
use parcurve::{
    advect::Rk4Stepper,
    comm::MpiTransport,
    config::{Algorithm, EngineConfig},
    context::RunContext,
    curve::{Seed, TerminationReason},
    domain::BoundingBox,
    field::BoxField,
    scheduler::advect_seeds,
    types::Vec3,
};

#[cfg(feature = "mpi")]
fn main() {
    let universe: Universe = mpi::initialize().unwrap();
    let world = universe.world();
    let rank = world.rank() as usize;
    let size = world.size() as usize;

    let num_domains = 2 * size;
    let field = BoxField::slabs(
        num_domains,
        BoundingBox::new([0.0; 3], [num_domains as f64, 1.0, 1.0]),
        0.1,
        |_t: f64, x: &Vec3| [1.0, 0.5 * (x[2] - 0.5), 0.5 * (0.5 - x[1])],
    );
    let seeds = (0..100)
        .map(|i| {
            let s = i as f64 / 100.0;
            Seed::new([0.05, 0.2 + 0.6 * s, 0.5], 0.0)
        })
        .collect::<Vec<_>>();

    let mut config = EngineConfig {
        algorithm: Algorithm::DomainParallel,
        return_to_originator: true,
        ..Default::default()
    };
    config.integration.step_size = 0.02;

    let ctx = RunContext::partitioned(rank, size, num_domains, config.partition).unwrap();
    let (curves, stats) = advect_seeds(
        ctx,
        config,
        field,
        Rk4Stepper,
        MpiTransport::new(world),
        &seeds,
    )
    .unwrap();

    if rank == 0 {
        let exited = curves
            .iter()
            .filter(|c| c.termination == TerminationReason::ExitedMesh)
            .count();
        println!(
            "{} of {} streamlines left the mesh after {} rounds",
            exited,
            curves.len(),
            stats.totals.rounds
        );
    }
}
#[cfg(not(feature = "mpi"))]
fn main() {}
