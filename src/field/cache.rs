//! Least-recently-used cache of loaded domains
use crate::domain::DomainType;
use crate::traits::FieldProvider;
use crate::types::FieldError;
use log::debug;
use std::collections::VecDeque;
use std::sync::Arc;

/// Keeps at most `capacity` domains of a [FieldProvider] loaded.
///
/// Curves refer to domains by id, so evicting a domain that curves still point at is
/// harmless; it is loaded again on the next request.
pub struct DomainCache<P: FieldProvider> {
    provider: P,
    capacity: usize,
    entries: VecDeque<(DomainType, Arc<P::Handle>)>,
    loads: usize,
    purges: usize,
}

impl<P: FieldProvider> DomainCache<P> {
    /// Create a cache holding up to `capacity` domains
    pub fn new(provider: P, capacity: usize) -> Self {
        Self {
            provider,
            capacity: capacity.max(1),
            entries: VecDeque::new(),
            loads: 0,
            purges: 0,
        }
    }

    /// The wrapped provider
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Whether a domain is currently loaded
    pub fn is_loaded(&self, domain: DomainType) -> bool {
        self.entries.iter().any(|(d, _)| *d == domain)
    }

    /// The loaded domains, least recently used first
    pub fn loaded_domains(&self) -> Vec<DomainType> {
        self.entries.iter().map(|(d, _)| *d).collect()
    }

    /// Get a domain, loading it and evicting the least recently used one if needed
    pub fn get(&mut self, domain: DomainType) -> Result<Arc<P::Handle>, FieldError> {
        if let Some(position) = self.entries.iter().position(|(d, _)| *d == domain) {
            if let Some(entry) = self.entries.remove(position) {
                let handle = Arc::clone(&entry.1);
                self.entries.push_back(entry);
                return Ok(handle);
            }
        }

        let handle = Arc::new(self.provider.load_domain(domain)?);
        self.loads += 1;
        while self.entries.len() >= self.capacity {
            if let Some((evicted, _)) = self.entries.pop_front() {
                debug!("Purging domain {evicted}");
                self.purges += 1;
            }
        }
        debug!("Loaded domain {domain}");
        self.entries.push_back((domain, Arc::clone(&handle)));
        Ok(handle)
    }

    /// Evict all domains of time slices before `time_step`
    pub fn purge_time_steps_before(&mut self, time_step: i32) {
        let before = self.entries.len();
        self.entries
            .retain(|(d, _)| d.time_step < 0 || d.time_step >= time_step);
        self.purges += before - self.entries.len();
    }

    /// Number of domain loads so far
    pub fn loads(&self) -> usize {
        self.loads
    }

    /// Number of evictions so far
    pub fn purges(&self) -> usize {
        self.purges
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::domain::BoundingBox;
    use crate::field::BoxField;
    use crate::types::Vec3;

    fn cache(capacity: usize) -> DomainCache<BoxField<impl Fn(f64, &Vec3) -> Vec3>> {
        let field = BoxField::slabs(
            4,
            BoundingBox::new([0.0; 3], [4.0, 1.0, 1.0]),
            0.0,
            |_t: f64, _x: &Vec3| [1.0, 0.0, 0.0],
        );
        DomainCache::new(field, capacity)
    }

    #[test]
    fn test_lru_eviction() {
        let mut c = cache(2);
        let d = |i| DomainType::spatial(i);
        c.get(d(0)).unwrap();
        c.get(d(1)).unwrap();
        c.get(d(0)).unwrap();
        assert_eq!(c.loads(), 2);
        c.get(d(2)).unwrap();
        assert!(c.is_loaded(d(0)));
        assert!(!c.is_loaded(d(1)));
        assert_eq!(c.loaded_domains(), vec![d(0), d(2)]);
        assert_eq!((c.loads(), c.purges()), (3, 1));

        c.get(d(1)).unwrap();
        assert_eq!((c.loads(), c.purges()), (4, 2));
    }

    #[test]
    fn test_load_failure_is_not_cached() {
        let mut c = cache(2);
        assert!(c.get(DomainType::spatial(7)).is_err());
        assert_eq!(c.loads(), 0);
        assert!(c.loaded_domains().is_empty());
    }

    #[test]
    fn test_purge_time_steps() {
        let field = BoxField::slabs(
            1,
            BoundingBox::new([0.0; 3], [1.0; 3]),
            0.0,
            |_t: f64, _x: &Vec3| [1.0, 0.0, 0.0],
        )
        .with_time_slices(&[0.0, 1.0, 2.0, 3.0]);
        let mut c = DomainCache::new(field, 3);
        for ts in 0..3 {
            c.get(DomainType::new(0, ts)).unwrap();
        }
        c.purge_time_steps_before(2);
        assert_eq!(c.loaded_domains(), vec![DomainType::new(0, 2)]);
        assert_eq!(c.purges(), 2);
    }
}
