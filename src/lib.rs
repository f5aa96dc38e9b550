//! Parcurve: parallel advection of integral curves through domain-decomposed vector fields
#![cfg_attr(feature = "strict", deny(warnings))]
#![warn(missing_docs)]

pub mod advect;
pub mod comm;
pub mod config;
pub mod context;
pub mod curve;
pub mod domain;
pub mod field;
pub mod restart;
pub mod routing;
pub mod scheduler;
pub mod statistics;
pub mod traits;
pub mod types;
