//! Domains and the static map from domains to owning ranks

use crate::types::{FatalError, Rank, Result, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A spatial block at a moment in time.
///
/// A `time_step` of -1 denotes a steady field. A `domain` of -1 means the block is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DomainType {
    /// Spatial block id
    pub domain: i32,
    /// Time slice id, -1 for steady fields
    pub time_step: i32,
}

impl DomainType {
    /// The unknown / out of bounds sentinel
    pub const UNKNOWN: DomainType = DomainType {
        domain: -1,
        time_step: -1,
    };

    /// Create a domain at a time slice
    pub fn new(domain: i32, time_step: i32) -> Self {
        Self { domain, time_step }
    }

    /// Create a domain of a steady field
    pub fn spatial(domain: i32) -> Self {
        Self {
            domain,
            time_step: -1,
        }
    }

    /// Whether this is the unknown sentinel
    pub fn is_unknown(&self) -> bool {
        self.domain < 0
    }
}

impl fmt::Display for DomainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.time_step < 0 {
            write!(f, "[{}]", self.domain)
        } else {
            write!(f, "[{}, ts {}]", self.domain, self.time_step)
        }
    }
}

/// An axis-aligned box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Lower corner
    pub min: Vec3,
    /// Upper corner
    pub max: Vec3,
}

impl BoundingBox {
    /// Create a box from its corners
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Whether the point lies in the closed box
    pub fn contains(&self, point: &Vec3) -> bool {
        (0..3).all(|i| self.min[i] <= point[i] && point[i] <= self.max[i])
    }

    /// The box grown by `margin` on every side
    pub fn expanded(&self, margin: f64) -> Self {
        Self {
            min: [
                self.min[0] - margin,
                self.min[1] - margin,
                self.min[2] - margin,
            ],
            max: [
                self.max[0] + margin,
                self.max[1] + margin,
                self.max[2] + margin,
            ],
        }
    }
}

/// How domains are dealt out to ranks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Partition {
    /// Consecutive runs of domains per rank, the first `n % p` ranks taking one extra
    #[default]
    Contiguous,
    /// Domain `d` goes to rank `d % p`
    RoundRobin,
}

/// Static map from spatial domain id to the owning rank.
///
/// Every rank builds the same map from the global domain count, so no communication
/// is needed to agree on it. All time slices of a block share the owner of the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainOwnershipMap {
    rank_of: Vec<Rank>,
    num_ranks: usize,
}

impl DomainOwnershipMap {
    /// Partition `num_domains` domains over `num_ranks` ranks
    pub fn new(num_domains: usize, num_ranks: usize, partition: Partition) -> Self {
        assert!(num_ranks > 0, "An ownership map needs at least one rank");
        let rank_of = match partition {
            Partition::Contiguous => {
                let per_rank = num_domains / num_ranks;
                let extra = num_domains % num_ranks;
                (0..num_ranks)
                    .flat_map(|r| std::iter::repeat(r).take(per_rank + usize::from(r < extra)))
                    .collect()
            }
            Partition::RoundRobin => (0..num_domains).map(|d| d % num_ranks).collect(),
        };
        Self { rank_of, num_ranks }
    }

    /// Number of domains covered
    pub fn num_domains(&self) -> usize {
        self.rank_of.len()
    }

    /// Number of ranks
    pub fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    /// The rank owning a domain
    pub fn domain_to_rank(&self, domain: DomainType) -> Result<Rank> {
        usize::try_from(domain.domain)
            .ok()
            .and_then(|d| self.rank_of.get(d).copied())
            .ok_or(FatalError::DomainOutOfRange {
                domain: domain.domain,
                num_domains: self.rank_of.len(),
            })
    }

    /// The spatial domain ids owned by a rank
    pub fn owned_domains(&self, rank: Rank) -> Vec<i32> {
        self.rank_of
            .iter()
            .enumerate()
            .filter(|(_, r)| **r == rank)
            .map(|(d, _)| d as i32)
            .collect()
    }

    /// Extend the map to cover newly discovered domains.
    ///
    /// Existing entries are never changed; new domains are dealt out round-robin.
    pub fn extend(&mut self, num_domains: usize) {
        for d in self.rank_of.len()..num_domains {
            self.rank_of.push(d % self.num_ranks);
        }
    }
}
