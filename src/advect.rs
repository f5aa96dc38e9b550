//! Integration of a single curve within its current domain
mod stepper;

pub use stepper::{EulerStepper, Rk4Stepper};

use crate::curve::{IntegralCurve, Status, TerminationReason};
use crate::traits::{FieldProvider, OdeStepper};
use crate::types::{add_scaled, distance, is_finite, Direction, StepError, Vec3};
use log::{trace, warn};

/// Relative tolerance used when comparing against the time limit
const TIME_TOLERANCE: f64 = 1e-12;

/// Limits at which a curve is finished
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TerminationCriteria {
    /// Maximum number of steps
    pub max_steps: Option<usize>,
    /// Maximum elapsed integration time
    pub max_time: Option<f64>,
    /// Maximum arc length
    pub max_distance: Option<f64>,
}

/// Parameters of the integration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegrationConfig {
    /// Direction of integration
    pub direction: Direction,
    /// Unsigned step size
    pub step_size: f64,
    /// Number of steps one call to [Advector::advect] may take
    pub max_steps_per_call: usize,
    /// Termination criteria
    pub termination: TerminationCriteria,
    /// Whether to record the positions visited
    pub record_trajectory: bool,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            direction: Direction::Forward,
            step_size: 0.01,
            max_steps_per_call: 1000,
            termination: TerminationCriteria {
                max_steps: Some(10_000),
                max_time: None,
                max_distance: None,
            },
            record_trajectory: false,
        }
    }
}

/// Performs bounded units of integration work on curves
pub struct Advector<S: OdeStepper> {
    stepper: S,
    config: IntegrationConfig,
}

impl<S: OdeStepper> Advector<S> {
    /// Create an advector
    pub fn new(stepper: S, config: IntegrationConfig) -> Self {
        Self { stepper, config }
    }

    /// The integration parameters
    pub fn config(&self) -> &IntegrationConfig {
        &self.config
    }

    /// Integrate a curve inside its loaded domain.
    ///
    /// Stops when the step budget is spent (status stays `Ok`), when a termination
    /// criterion is met (`Finished`), when the curve leaves the domain (`OutOfBounds`, or
    /// `Finished` if no domain can contain the exit point), or when the field cannot be
    /// sampled (`Error`). Returns the number of steps taken.
    pub fn advect<P: FieldProvider>(
        &self,
        curve: &mut IntegralCurve,
        provider: &P,
        handle: &P::Handle,
    ) -> usize {
        debug_assert_eq!(curve.status, Status::Ok);
        if self.config.record_trajectory && curve.trajectory.is_empty() {
            curve.trajectory.push(curve.position);
        }

        let mut taken = 0;
        while taken < self.config.max_steps_per_call {
            if let Some(reason) = self.reached_limit(curve) {
                curve.terminate(reason);
                return taken;
            }

            let Some(velocity) = provider.sample(handle, curve.time, &curve.position) else {
                warn!(
                    "Curve {} could not sample the field at {:?} in domain {}",
                    curve.id, curve.position, curve.domain
                );
                curve.fail(TerminationReason::SamplingFailure);
                return taken;
            };
            curve.velocity = velocity;

            let h = self.step_size(curve);
            let mut rhs = |t: f64, x: &Vec3| provider.sample(handle, t, x);
            let next = match self
                .stepper
                .step(&mut rhs, curve.time, &curve.position, &velocity, h)
            {
                Ok(next) => next,
                // Higher order stages may leave the domain near its boundary
                Err(StepError::OutsideDomain) => add_scaled(&curve.position, h, &velocity),
                Err(StepError::Diverged) => {
                    warn!("Curve {} diverged in domain {}", curve.id, curve.domain);
                    curve.fail(TerminationReason::StepperFailure);
                    return taken;
                }
            };
            if !is_finite(&next) {
                curve.fail(TerminationReason::StepperFailure);
                return taken;
            }

            curve.distance += distance(&curve.position, &next);
            curve.position = next;
            curve.time += h;
            curve.integration_time += h.abs();
            curve.steps_taken += 1;
            taken += 1;
            if self.config.record_trajectory {
                curve.trajectory.push(next);
            }

            if let Some(reason) = self.reached_limit(curve) {
                curve.terminate(reason);
                return taken;
            }

            if !provider.contains(handle, curve.time, &curve.position) {
                let candidates = provider.candidate_domains(curve.time, &curve.position);
                trace!(
                    "Curve {} left domain {} at {:?}, {} candidates",
                    curve.id,
                    curve.domain,
                    curve.position,
                    candidates.len()
                );
                if candidates.is_empty() {
                    curve.terminate(TerminationReason::ExitedMesh);
                } else {
                    curve.mark_out_of_bounds(candidates);
                }
                return taken;
            }
        }
        taken
    }

    fn reached_limit(&self, curve: &IntegralCurve) -> Option<TerminationReason> {
        let criteria = &self.config.termination;
        if criteria
            .max_steps
            .is_some_and(|max| curve.steps_taken >= max)
        {
            return Some(TerminationReason::MaxSteps);
        }
        if criteria.max_time.is_some_and(|max| {
            curve.integration_time >= max - TIME_TOLERANCE * max.abs().max(1.0)
        }) {
            return Some(TerminationReason::MaxTime);
        }
        if criteria
            .max_distance
            .is_some_and(|max| curve.distance >= max)
        {
            return Some(TerminationReason::MaxDistance);
        }
        None
    }

    /// Signed step size, clamped so the time limit is hit exactly
    fn step_size(&self, curve: &IntegralCurve) -> f64 {
        let mut h = self.config.step_size;
        if let Some(max) = self.config.termination.max_time {
            h = h.min(max - curve.integration_time);
        }
        h * self.config.direction.sign()
    }
}
