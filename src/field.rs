//! Field providers and the domain cache
mod box_field;
mod cache;

pub use box_field::{BoxDomain, BoxField};
pub use cache::DomainCache;
