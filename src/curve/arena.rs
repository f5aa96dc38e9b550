//! Rank-local storage of curves behind stable handles

use crate::curve::IntegralCurve;
use crate::types::{FatalError, Result};

/// A stable handle to a curve in a [CurveArena]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CurveHandle(usize);

impl CurveHandle {
    /// The slot index
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Owner of every curve living on a rank.
///
/// Queues hold handles. Removing a curve frees its slot for reuse.
#[derive(Debug, Default)]
pub struct CurveArena {
    slots: Vec<Option<IntegralCurve>>,
    free: Vec<usize>,
    len: usize,
}

impl CurveArena {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a curve
    pub fn insert(&mut self, curve: IntegralCurve) -> CurveHandle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            self.slots[index] = Some(curve);
            CurveHandle(index)
        } else {
            self.slots.push(Some(curve));
            CurveHandle(self.slots.len() - 1)
        }
    }

    /// Take a curve out of the arena
    pub fn remove(&mut self, handle: CurveHandle) -> Result<IntegralCurve> {
        let curve = self
            .slots
            .get_mut(handle.0)
            .and_then(Option::take)
            .ok_or(FatalError::InvalidHandle(handle.0))?;
        self.free.push(handle.0);
        self.len -= 1;
        Ok(curve)
    }

    /// Access a curve
    pub fn get(&self, handle: CurveHandle) -> Result<&IntegralCurve> {
        self.slots
            .get(handle.0)
            .and_then(Option::as_ref)
            .ok_or(FatalError::InvalidHandle(handle.0))
    }

    /// Mutably access a curve
    pub fn get_mut(&mut self, handle: CurveHandle) -> Result<&mut IntegralCurve> {
        self.slots
            .get_mut(handle.0)
            .and_then(Option::as_mut)
            .ok_or(FatalError::InvalidHandle(handle.0))
    }

    /// Number of live curves
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the arena holds no curve
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate over live curves
    pub fn iter(&self) -> impl Iterator<Item = (CurveHandle, &IntegralCurve)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|c| (CurveHandle(i), c)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::curve::Seed;
    use rand::Rng;

    fn curve(id: u64) -> IntegralCurve {
        IntegralCurve::from_seed(id, &Seed::new([0.0; 3], 0.0), vec![], 0)
    }

    #[test]
    fn test_insert_remove() {
        let mut arena = CurveArena::new();
        let a = arena.insert(curve(1));
        let b = arena.insert(curve(2));
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(b).unwrap().id, 2);

        assert_eq!(arena.remove(a).unwrap().id, 1);
        assert!(arena.get(a).is_err());
        assert!(matches!(arena.remove(a), Err(FatalError::InvalidHandle(_))));

        let c = arena.insert(curve(3));
        assert_eq!(c, a);
        assert_eq!(arena.get(c).unwrap().id, 3);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_random_churn() {
        let mut rng = rand::thread_rng();
        let mut arena = CurveArena::new();
        let mut live = vec![];
        for id in 0..500 {
            if !live.is_empty() && rng.gen_bool(0.4) {
                let (handle, expected) = live.swap_remove(rng.gen_range(0..live.len()));
                assert_eq!(arena.remove(handle).unwrap().id, expected);
            } else {
                live.push((arena.insert(curve(id)), id));
            }
            assert_eq!(arena.len(), live.len());
        }
        for (handle, id) in &live {
            arena.get_mut(*handle).unwrap().steps_taken = *id as usize;
        }
        assert_eq!(arena.iter().count(), live.len());
        for (_, c) in arena.iter() {
            assert_eq!(c.steps_taken as u64, c.id);
        }
    }
}
