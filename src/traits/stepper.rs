//! ODE steppers
use crate::types::{StepError, Vec3};

/// A single step of an ODE solver for `dx/dt = v(t, x)`.
pub trait OdeStepper {
    /// Advance `position` at `time` by a step of signed size `h`.
    ///
    /// `velocity` is the field value at the starting point. `rhs` evaluates the field at
    /// intermediate stages and returns `None` where it is not defined.
    fn step(
        &self,
        rhs: &mut dyn FnMut(f64, &Vec3) -> Option<Vec3>,
        time: f64,
        position: &Vec3,
        velocity: &Vec3,
        h: f64,
    ) -> Result<Vec3, StepError>;
}
