//! A field of axis-aligned box domains with an analytic velocity
use crate::domain::{BoundingBox, DomainType};
use crate::traits::FieldProvider;
use crate::types::{FieldError, Vec3};

/// One box domain.
///
/// `bounds` is what candidate lookup sees and may overlap neighbouring domains;
/// `geometry` is the region the domain really covers.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxDomain {
    /// Domain id
    pub domain: DomainType,
    /// Bounding box used by candidate lookup
    pub bounds: BoundingBox,
    /// True extent of the domain
    pub geometry: BoundingBox,
    /// Half-open time interval covered, `None` for steady domains
    pub time_interval: Option<(f64, f64)>,
}

impl BoxDomain {
    /// A steady domain whose bounds extend its geometry by `overlap`
    pub fn new(domain: DomainType, geometry: BoundingBox, overlap: f64) -> Self {
        Self {
            domain,
            bounds: geometry.expanded(overlap),
            geometry,
            time_interval: None,
        }
    }

    fn covers_time(&self, time: f64) -> bool {
        self.time_interval
            .map_or(true, |(start, end)| start <= time && time < end)
    }
}

/// Box domains sampling the velocity function `V(t, x)`.
///
/// Geometries are half-open: a point on a face shared by two domains belongs to the
/// domain above it. Faces on the upper extent of the mesh stay closed.
pub struct BoxField<V> {
    domains: Vec<BoxDomain>,
    upper: Vec3,
    velocity: V,
    degenerate: Vec<BoundingBox>,
    unloadable: Vec<DomainType>,
}

impl<V: Fn(f64, &Vec3) -> Vec3> BoxField<V> {
    /// Create a field without domains
    pub fn new(velocity: V) -> Self {
        Self {
            domains: vec![],
            upper: [f64::NEG_INFINITY; 3],
            velocity,
            degenerate: vec![],
            unloadable: vec![],
        }
    }

    /// Split `extent` into `n` slabs along x. The bounds of each slab overlap its
    /// neighbours by `overlap`.
    pub fn slabs(n: usize, extent: BoundingBox, overlap: f64, velocity: V) -> Self {
        let width = (extent.max[0] - extent.min[0]) / n as f64;
        let mut field = Self::new(velocity);
        for i in 0..n {
            let mut geometry = extent;
            geometry.min[0] = extent.min[0] + i as f64 * width;
            geometry.max[0] = extent.min[0] + (i + 1) as f64 * width;
            field.push(BoxDomain::new(
                DomainType::spatial(i as i32),
                geometry,
                overlap,
            ));
        }
        field
    }

    /// Add a domain
    pub fn with_domain(mut self, domain: BoxDomain) -> Self {
        self.push(domain);
        self
    }

    fn push(&mut self, domain: BoxDomain) {
        for i in 0..3 {
            self.upper[i] = self.upper[i].max(domain.geometry.max[i]);
        }
        self.domains.push(domain);
    }

    fn inside(&self, geometry: &BoundingBox, point: &Vec3) -> bool {
        (0..3).all(|i| {
            geometry.min[i] <= point[i]
                && (point[i] < geometry.max[i]
                    || (point[i] == geometry.max[i] && geometry.max[i] >= self.upper[i]))
        })
    }

    /// Replace every steady domain by one copy per time slice `[times[k], times[k + 1])`
    pub fn with_time_slices(mut self, times: &[f64]) -> Self {
        self.domains = self
            .domains
            .iter()
            .flat_map(|d| {
                times.windows(2).enumerate().map(move |(k, w)| BoxDomain {
                    domain: DomainType::new(d.domain.domain, k as i32),
                    time_interval: Some((w[0], w[1])),
                    ..d.clone()
                })
            })
            .collect();
        self
    }

    /// Make sampling fail inside a region, as it would in degenerate cells
    pub fn with_degenerate_region(mut self, region: BoundingBox) -> Self {
        self.degenerate.push(region);
        self
    }

    /// Make loading a domain fail
    pub fn with_unloadable_domain(mut self, domain: DomainType) -> Self {
        self.unloadable.push(domain);
        self
    }

    /// The domains of the field
    pub fn domains(&self) -> &[BoxDomain] {
        &self.domains
    }
}

impl<V: Fn(f64, &Vec3) -> Vec3> FieldProvider for BoxField<V> {
    type Handle = BoxDomain;

    fn num_domains(&self) -> usize {
        self.domains
            .iter()
            .map(|d| d.domain.domain as usize + 1)
            .max()
            .unwrap_or(0)
    }

    fn load_domain(&mut self, domain: DomainType) -> Result<BoxDomain, FieldError> {
        if self.unloadable.contains(&domain) {
            return Err(FieldError::LoadFailed {
                domain,
                reason: String::from("domain marked unloadable"),
            });
        }
        self.domains
            .iter()
            .find(|d| d.domain == domain)
            .cloned()
            .ok_or(FieldError::UnknownDomain(domain))
    }

    fn sample(&self, handle: &BoxDomain, time: f64, point: &Vec3) -> Option<Vec3> {
        if self.degenerate.iter().any(|r| r.contains(point)) || !handle.bounds.contains(point) {
            None
        } else {
            Some((self.velocity)(time, point))
        }
    }

    fn contains(&self, handle: &BoxDomain, time: f64, point: &Vec3) -> bool {
        self.inside(&handle.geometry, point) && handle.covers_time(time)
    }

    fn candidate_domains(&self, time: f64, point: &Vec3) -> Vec<DomainType> {
        let mut candidates = self
            .domains
            .iter()
            .filter(|d| d.bounds.contains(point) && d.covers_time(time))
            .map(|d| d.domain)
            .collect::<Vec<_>>();
        candidates.sort();
        candidates
    }
}
