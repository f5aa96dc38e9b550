//! Access to the vector field
use crate::domain::DomainType;
use crate::types::{FieldError, Vec3};

/// Loads domains and samples the vector field inside them.
///
/// This is the boundary to the mesh and interpolation machinery: the engine only asks
/// for a domain, for field values inside it, and which domains might contain a point.
pub trait FieldProvider {
    /// Opaque handle to a loaded domain
    type Handle;

    /// Number of spatial domains
    fn num_domains(&self) -> usize;

    /// Load the data of a domain
    fn load_domain(&mut self, domain: DomainType) -> Result<Self::Handle, FieldError>;

    /// Sample the field. Returns `None` if the point cannot be located in a valid cell.
    fn sample(&self, handle: &Self::Handle, time: f64, point: &Vec3) -> Option<Vec3>;

    /// Exact test of whether a point at a time lies inside the domain.
    ///
    /// The domains covering one time must not share points: every point is inside at
    /// most one of them, including points on shared faces.
    fn contains(&self, handle: &Self::Handle, time: f64, point: &Vec3) -> bool;

    /// Domains whose bounds may contain the point.
    ///
    /// This is a cheap overlap filter; the result can include domains whose geometry
    /// does not actually contain the point.
    fn candidate_domains(&self, time: f64, point: &Vec3) -> Vec<DomainType>;
}
