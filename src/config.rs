//! Run configuration
use crate::advect::IntegrationConfig;
use crate::domain::Partition;
use crate::types::{FatalError, Result};
use std::path::PathBuf;

/// Scheduling strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    /// Domains are partitioned over the ranks and curves follow their domains
    #[default]
    DomainParallel,
    /// Seeds are spread over the ranks, domains are loaded on demand and idle ranks
    /// receive work from loaded ones
    WorkQueue,
    /// Domain-parallel over a sequence of time slices
    TimeSlice,
}

/// Parameters of a run
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Domains each rank keeps loaded
    pub max_cached_domains: usize,
    /// Curves advected per rank per round
    pub max_count: usize,
    /// Messages drained per non-blocking poll
    pub num_recvs: usize,
    /// Scheduling strategy
    pub algorithm: Algorithm,
    /// Assignment of domains to ranks
    pub partition: Partition,
    /// Integration parameters
    pub integration: IntegrationConfig,
    /// Last time slice integrated by [Algorithm::TimeSlice]
    pub final_time_slice: i32,
    /// Directory for restart files, if any
    pub restart_dir: Option<PathBuf>,
    /// Whether finished curves are sent back to the rank that seeded them
    pub return_to_originator: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cached_domains: 20,
            max_count: 1000,
            num_recvs: 64,
            algorithm: Algorithm::default(),
            partition: Partition::default(),
            integration: IntegrationConfig::default(),
            final_time_slice: 0,
            restart_dir: None,
            return_to_originator: false,
        }
    }
}

impl EngineConfig {
    /// Check the parameters for consistency
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| Err(FatalError::InvalidConfig(String::from(message)));
        if self.max_cached_domains == 0 {
            return invalid("max_cached_domains must be positive");
        }
        if self.max_count == 0 {
            return invalid("max_count must be positive");
        }
        if self.num_recvs == 0 {
            return invalid("num_recvs must be positive");
        }
        let integration = &self.integration;
        if !(integration.step_size.is_finite() && integration.step_size > 0.0) {
            return invalid("step_size must be positive and finite");
        }
        if integration.max_steps_per_call == 0 {
            return invalid("max_steps_per_call must be positive");
        }
        let termination = &integration.termination;
        if termination.max_time.is_some_and(|t| t.is_nan() || t < 0.0) {
            return invalid("max_time must not be negative");
        }
        if termination.max_distance.is_some_and(|d| d.is_nan() || d < 0.0) {
            return invalid("max_distance must not be negative");
        }
        if self.final_time_slice < 0 {
            return invalid("final_time_slice must not be negative");
        }
        Ok(())
    }
}
