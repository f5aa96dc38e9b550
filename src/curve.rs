//! Integral curve state
mod arena;

pub use arena::{CurveArena, CurveHandle};

use crate::domain::DomainType;
use crate::types::{CurveId, Rank, Vec3};
use serde::{Deserialize, Serialize};

/// Status of an integral curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Ready to be integrated in its current domain
    Ok,
    /// A termination criterion was met
    Finished,
    /// The curve left its domain and awaits routing
    OutOfBounds,
    /// Integration failed; this state is absorbing
    Error,
}

impl Status {
    /// Whether the curve will not be integrated any further
    pub fn is_terminated(self) -> bool {
        matches!(self, Status::Finished | Status::Error)
    }
}

/// Why a curve stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TerminationReason {
    /// Still running
    #[default]
    None,
    /// Maximum number of steps reached
    MaxSteps,
    /// Maximum integration time reached
    MaxTime,
    /// Maximum arc length reached
    MaxDistance,
    /// Left every domain of the mesh
    ExitedMesh,
    /// Reached the end of the current time slice; may resume in a later one
    SliceBoundary,
    /// The field could not be sampled at the curve position
    SamplingFailure,
    /// The stepper failed
    StepperFailure,
    /// The domain containing the curve could not be loaded
    DomainLoadFailure,
}

/// A seed point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Seed {
    /// Initial position
    pub position: Vec3,
    /// Initial time
    pub time: f64,
}

impl Seed {
    /// Create a seed
    pub fn new(position: Vec3, time: f64) -> Self {
        Self { position, time }
    }
}

/// The progress of one integral curve.
///
/// Curves are plain values: they are moved between ranks by serialising them, and they
/// refer to their domain by id only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegralCurve {
    /// Identifier, shared by the duplicates of one seed
    pub id: CurveId,
    /// The domain believed to contain the curve, `DomainType::UNKNOWN` while out of bounds
    pub domain: DomainType,
    /// Current position
    pub position: Vec3,
    /// Field value at the start of the last step
    pub velocity: Vec3,
    /// Current time
    pub time: f64,
    /// Status
    pub status: Status,
    /// Why the curve stopped, if it did
    pub termination: TerminationReason,
    /// Domains the curve may belong to next
    pub seed_pt_domain_list: Vec<DomainType>,
    /// The rank that accepted the seed
    pub originating_rank: Rank,
    /// Steps taken so far
    pub steps_taken: usize,
    /// Elapsed integration time, always non-negative
    pub integration_time: f64,
    /// Arc length travelled
    pub distance: f64,
    /// Positions visited, if recording is enabled
    pub trajectory: Vec<Vec3>,
}

impl IntegralCurve {
    /// A new curve at a seed point, not yet assigned to a domain
    pub fn from_seed(
        id: CurveId,
        seed: &Seed,
        candidates: Vec<DomainType>,
        originating_rank: Rank,
    ) -> Self {
        Self {
            id,
            domain: DomainType::UNKNOWN,
            position: seed.position,
            velocity: [0.0; 3],
            time: seed.time,
            status: Status::OutOfBounds,
            termination: TerminationReason::None,
            seed_pt_domain_list: candidates,
            originating_rank,
            steps_taken: 0,
            integration_time: 0.0,
            distance: 0.0,
            trajectory: vec![],
        }
    }

    /// Whether the curve will not be integrated any further
    pub fn is_terminated(&self) -> bool {
        self.status.is_terminated()
    }

    /// Place the curve in a domain, ready for integration
    pub fn assign_domain(&mut self, domain: DomainType) {
        self.domain = domain;
        self.status = Status::Ok;
        self.seed_pt_domain_list.clear();
    }

    /// Mark the curve as having left its domain
    pub fn mark_out_of_bounds(&mut self, candidates: Vec<DomainType>) {
        debug_assert!(!candidates.is_empty());
        self.domain = DomainType::UNKNOWN;
        self.status = Status::OutOfBounds;
        self.seed_pt_domain_list = candidates;
    }

    /// Finish the curve
    pub fn terminate(&mut self, reason: TerminationReason) {
        self.status = Status::Finished;
        self.termination = reason;
    }

    /// Put the curve in the absorbing error state
    pub fn fail(&mut self, reason: TerminationReason) {
        self.status = Status::Error;
        self.termination = reason;
    }

    /// Revive a curve parked at a time slice boundary so it can be routed into the next slice
    pub fn reset_for_continue_execute(&mut self) {
        debug_assert_eq!(self.termination, TerminationReason::SliceBoundary);
        self.termination = TerminationReason::None;
        self.domain = DomainType::UNKNOWN;
        self.status = Status::OutOfBounds;
    }

    /// Whether the curve is parked waiting for a time slice after `time_step`
    pub fn needs_time_step_after(&self, time_step: i32) -> bool {
        self.status == Status::Finished
            && self.termination == TerminationReason::SliceBoundary
            && self
                .seed_pt_domain_list
                .iter()
                .any(|d| d.time_step > time_step)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn curve() -> IntegralCurve {
        IntegralCurve::from_seed(
            7,
            &Seed::new([1.0, 2.0, 3.0], 0.0),
            vec![DomainType::spatial(0), DomainType::spatial(1)],
            0,
        )
    }

    #[test]
    fn test_seeded_curve_is_out_of_bounds() {
        let c = curve();
        assert_eq!(c.status, Status::OutOfBounds);
        assert!(c.domain.is_unknown());
        assert_eq!(c.seed_pt_domain_list.len(), 2);
    }

    #[test]
    fn test_status_transitions() {
        let mut c = curve();
        c.assign_domain(DomainType::spatial(1));
        assert_eq!(c.status, Status::Ok);
        assert!(c.seed_pt_domain_list.is_empty());

        c.mark_out_of_bounds(vec![DomainType::spatial(2)]);
        assert_eq!(c.status, Status::OutOfBounds);
        assert!(c.domain.is_unknown());

        c.assign_domain(DomainType::spatial(2));
        c.terminate(TerminationReason::MaxSteps);
        assert!(c.is_terminated());

        c.fail(TerminationReason::SamplingFailure);
        assert_eq!(c.status, Status::Error);
        assert!(c.is_terminated());
    }

    #[test]
    fn test_continue_execute() {
        let mut c = curve();
        c.assign_domain(DomainType::new(0, 0));
        c.mark_out_of_bounds(vec![DomainType::new(0, 1)]);
        c.terminate(TerminationReason::SliceBoundary);
        assert!(c.needs_time_step_after(0));
        assert!(!c.needs_time_step_after(1));

        c.reset_for_continue_execute();
        assert_eq!(c.status, Status::OutOfBounds);
        assert_eq!(c.termination, TerminationReason::None);
        assert_eq!(c.seed_pt_domain_list, vec![DomainType::new(0, 1)]);
    }
}
