//! Reference ODE steppers
use crate::traits::OdeStepper;
use crate::types::{add_scaled, is_finite, StepError, Vec3};

/// Forward Euler
#[derive(Debug, Clone, Copy, Default)]
pub struct EulerStepper;

impl OdeStepper for EulerStepper {
    fn step(
        &self,
        _rhs: &mut dyn FnMut(f64, &Vec3) -> Option<Vec3>,
        _time: f64,
        position: &Vec3,
        velocity: &Vec3,
        h: f64,
    ) -> Result<Vec3, StepError> {
        let next = add_scaled(position, h, velocity);
        if is_finite(&next) {
            Ok(next)
        } else {
            Err(StepError::Diverged)
        }
    }
}

/// Classical fourth order Runge-Kutta
#[derive(Debug, Clone, Copy, Default)]
pub struct Rk4Stepper;

impl OdeStepper for Rk4Stepper {
    fn step(
        &self,
        rhs: &mut dyn FnMut(f64, &Vec3) -> Option<Vec3>,
        time: f64,
        position: &Vec3,
        velocity: &Vec3,
        h: f64,
    ) -> Result<Vec3, StepError> {
        let half = 0.5 * h;
        let k1 = *velocity;
        let k2 =
            rhs(time + half, &add_scaled(position, half, &k1)).ok_or(StepError::OutsideDomain)?;
        let k3 =
            rhs(time + half, &add_scaled(position, half, &k2)).ok_or(StepError::OutsideDomain)?;
        let k4 = rhs(time + h, &add_scaled(position, h, &k3)).ok_or(StepError::OutsideDomain)?;
        let mut next = *position;
        for i in 0..3 {
            next[i] += h / 6.0 * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]);
        }
        if is_finite(&next) {
            Ok(next)
        } else {
            Err(StepError::Diverged)
        }
    }
}
