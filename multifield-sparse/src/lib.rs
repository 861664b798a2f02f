//! Block-partitioned sparse linear algebra for monolithic multi-field systems.
//!
//! The types in this crate handle the bookkeeping between per-field sub-vectors/sub-matrices
//! and the single combined operator handed to a linear solver: the partition of the combined
//! DOF index space ([`DofMapExtractor`]), the `n × n` grid of sparse blocks
//! ([`BlockMatrix`]), row/column rescaling for conditioning ([`Equilibration`]) and
//! Dirichlet row handling.

pub mod block;
pub mod equilibrate;
pub mod extractor;

pub use block::{apply_dirichlet, zero_rows, BlockMatrix, BlockMatrixError};
pub use equilibrate::{Equilibration, EquilibrationError, EquilibrationMethod};
pub use extractor::{DofMapExtractor, PartitionError};

pub use nalgebra;
pub use nalgebra_sparse;
