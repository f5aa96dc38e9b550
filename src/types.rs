//! Type definitions shared by the whole crate

use crate::domain::DomainType;
use serde::{Deserialize, Serialize};

/// A point or a vector in three dimensions
pub type Vec3 = [f64; 3];

/// The rank of a process
pub type Rank = usize;

/// Identifier of an integral curve
pub type CurveId = u64;

/// Errors that abort the whole run.
///
/// Anything that can go wrong with a single curve (a degenerate cell, a diverging step)
/// is recorded on the curve itself and never turns into one of these.
#[derive(thiserror::Error, Debug)]
pub enum FatalError {
    /// The transport failed to send or receive
    #[error("Communication failure: {0}")]
    Communication(String),
    /// A message could not be decoded or did not match its envelope
    #[error("Malformed message from rank {source_rank}: {reason}")]
    MalformedMessage {
        /// Rank the message came from
        source_rank: Rank,
        /// What was wrong with it
        reason: String,
    },
    /// A domain id that the ownership map does not cover
    #[error("Domain {domain} is outside an ownership map of {num_domains} domains")]
    DomainOutOfRange {
        /// The offending domain id
        domain: i32,
        /// Number of domains in the map
        num_domains: usize,
    },
    /// A curve handle that does not refer to a live curve
    #[error("Invalid curve handle {0}")]
    InvalidHandle(usize),
    /// Inconsistent run parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// A restart file exists but does not describe the expected population
    #[error("Corrupt restart data: {0}")]
    CorruptRestart(String),
    /// Filesystem error while writing or reading restart data
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Binary encoding error
    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

/// Result type for fatal errors
pub type Result<T> = std::result::Result<T, FatalError>;

/// Failure of the field provider to deliver a domain
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    /// The provider knows nothing about the domain
    #[error("Unknown domain {0}")]
    UnknownDomain(DomainType),
    /// The domain exists but could not be loaded
    #[error("Failed to load domain {domain}: {reason}")]
    LoadFailed {
        /// The domain that failed to load
        domain: DomainType,
        /// Description of the failure
        reason: String,
    },
}

/// Failure of a single ODE step
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepError {
    /// An intermediate stage of the step left the region where the field is defined
    #[error("Step left the domain")]
    OutsideDomain,
    /// The step produced a non-finite position
    #[error("Step diverged")]
    Diverged,
}

/// Direction of integration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    /// Integrate forward in time
    #[default]
    Forward,
    /// Integrate backward in time
    Backward,
}

impl Direction {
    /// The sign applied to the step size
    pub fn sign(self) -> f64 {
        match self {
            Direction::Forward => 1.0,
            Direction::Backward => -1.0,
        }
    }
}

/// Compute `x + h * v`
pub fn add_scaled(x: &Vec3, h: f64, v: &Vec3) -> Vec3 {
    [x[0] + h * v[0], x[1] + h * v[1], x[2] + h * v[2]]
}

/// Euclidean distance between two points
pub fn distance(a: &Vec3, b: &Vec3) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

/// Whether every component is finite
pub fn is_finite(x: &Vec3) -> bool {
    x.iter().all(|c| c.is_finite())
}
