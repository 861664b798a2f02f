//! Monolithic multi-field nonlinear solver infrastructure.
//!
//! `multifield` couples an arbitrary number of single-field finite element solvers into
//! one combined nonlinear problem: per-iteration the fields are evaluated against each
//! other's current iterates, their Jacobians and coupling sensitivities are gathered
//! into a block-partitioned operator, and a single Newton step is taken on the combined
//! system. The crate also provides per-element static condensation for trace-based
//! (HDG-style) discretizations, where interior unknowns are eliminated element by
//! element and only trace unknowns reach the global system.
//!
//! The block bookkeeping (DOF partitions, block operators, equilibration) lives in the
//! [`multifield-sparse`](multifield_sparse) companion crate, re-exported here as
//! [`sparse`].

pub mod condensation;
pub mod fdcheck;
pub mod field;
pub mod monolithic;
pub mod norms;
pub mod solver;

pub mod sparse {
    pub use multifield_sparse::*;
}

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

use nalgebra::RealField;

/// Trait alias for the scalar types supported by this crate.
pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}
