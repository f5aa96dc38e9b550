//! The per-rank run context

use crate::domain::{DomainOwnershipMap, DomainType, Partition};
use crate::types::{CurveId, FatalError, Rank, Result};
use std::ops::Range;

/// Everything a rank knows about the distributed run.
///
/// Components take a context instead of reading process-wide state, so several ranks
/// can be simulated side by side in one process.
#[derive(Debug, Clone)]
pub struct RunContext {
    rank: Rank,
    size: usize,
    ownership: DomainOwnershipMap,
    next_id: CurveId,
}

impl RunContext {
    /// Create the context of `rank` in a run of `size` ranks
    pub fn new(rank: Rank, size: usize, ownership: DomainOwnershipMap) -> Result<Self> {
        if rank >= size {
            return Err(FatalError::InvalidConfig(format!(
                "rank {rank} is outside a run of {size} ranks"
            )));
        }
        if ownership.num_ranks() != size {
            return Err(FatalError::InvalidConfig(format!(
                "ownership map was built for {} ranks, run has {size}",
                ownership.num_ranks()
            )));
        }
        Ok(Self {
            rank,
            size,
            ownership,
            next_id: 0,
        })
    }

    /// Create a context by partitioning `num_domains` domains over the run
    pub fn partitioned(
        rank: Rank,
        size: usize,
        num_domains: usize,
        partition: Partition,
    ) -> Result<Self> {
        Self::new(
            rank,
            size,
            DomainOwnershipMap::new(num_domains, size, partition),
        )
    }

    /// Context of a single-rank run
    pub fn serial(num_domains: usize) -> Self {
        Self {
            rank: 0,
            size: 1,
            ownership: DomainOwnershipMap::new(num_domains, 1, Partition::Contiguous),
            next_id: 0,
        }
    }

    /// This rank
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Number of ranks
    pub fn size(&self) -> usize {
        self.size
    }

    /// The domain ownership map
    pub fn ownership(&self) -> &DomainOwnershipMap {
        &self.ownership
    }

    /// Mutable access to the ownership map, for extending it with new domains
    pub fn ownership_mut(&mut self) -> &mut DomainOwnershipMap {
        &mut self.ownership
    }

    /// The rank owning a domain
    pub fn domain_to_rank(&self, domain: DomainType) -> Result<Rank> {
        self.ownership.domain_to_rank(domain)
    }

    /// Whether this rank owns a domain. Domains outside the map are owned by nobody.
    pub fn own_domain(&self, domain: DomainType) -> bool {
        self.ownership
            .domain_to_rank(domain)
            .is_ok_and(|r| r == self.rank)
    }

    /// Allocate `n` consecutive curve ids.
    ///
    /// The counter advances in lock-step on every rank as long as all ranks allocate the
    /// same amounts in the same order, which is what collective seeding does.
    pub fn allocate_ids(&mut self, n: usize) -> Range<CurveId> {
        let start = self.next_id;
        self.next_id += n as CurveId;
        start..self.next_id
    }

    /// Make sure future ids are larger than `id`
    pub fn reserve_ids_through(&mut self, id: CurveId) {
        self.next_id = self.next_id.max(id + 1);
    }

    /// The next id that would be allocated
    pub fn next_id(&self) -> CurveId {
        self.next_id
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_own_domain() {
        let contexts = (0..3)
            .map(|r| RunContext::partitioned(r, 3, 6, Partition::Contiguous).unwrap())
            .collect::<Vec<_>>();
        for d in 0..6 {
            let domain = DomainType::spatial(d);
            let owners = contexts
                .iter()
                .filter(|c| c.own_domain(domain))
                .map(|c| c.rank())
                .collect::<Vec<_>>();
            assert_eq!(owners, vec![d as usize / 2]);
        }
        assert!(!contexts[0].own_domain(DomainType::UNKNOWN));
        assert!(!contexts[0].own_domain(DomainType::spatial(6)));
    }

    #[test]
    fn test_ids_advance_in_lock_step() {
        let mut a = RunContext::partitioned(0, 2, 2, Partition::Contiguous).unwrap();
        let mut b = RunContext::partitioned(1, 2, 2, Partition::Contiguous).unwrap();
        assert_eq!(a.allocate_ids(4), b.allocate_ids(4));
        assert_eq!(a.allocate_ids(2), 4..6);
        b.reserve_ids_through(3);
        assert_eq!(b.next_id(), 4);
        b.reserve_ids_through(41);
        assert_eq!(b.allocate_ids(1), 42..43);
    }

    #[test]
    fn test_invalid_context() {
        assert!(RunContext::partitioned(2, 2, 4, Partition::Contiguous).is_err());
        let map = DomainOwnershipMap::new(4, 3, Partition::Contiguous);
        assert!(RunContext::new(0, 2, map).is_err());
    }
}
