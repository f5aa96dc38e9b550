//! Trait definitions

mod field;
mod scheduler;
mod stepper;
mod transport;

pub use field::FieldProvider;
pub use scheduler::{RoundOutcome, Scheduler};
pub use stepper::OdeStepper;
pub use transport::{ReduceOp, Tag, Transport};
