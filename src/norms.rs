//! Vector norms used by the convergence checks.

use crate::Real;
use nalgebra::DVectorView;
use serde::{Deserialize, Serialize};

/// The vector norm applied to residual and increment vectors in the convergence check.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorNorm {
    L1,
    L2,
    Inf,
}

impl VectorNorm {
    /// Short label used in the iteration report header.
    pub fn label(&self) -> &'static str {
        match self {
            VectorNorm::L1 => "L1",
            VectorNorm::L2 => "L2",
            VectorNorm::Inf => "inf",
        }
    }
}

pub fn vector_norm<T: Real>(kind: VectorNorm, vector: DVectorView<T>) -> T {
    match kind {
        VectorNorm::L1 => vector.iter().fold(T::zero(), |acc, x| acc + x.abs()),
        VectorNorm::L2 => vector.norm(),
        VectorNorm::Inf => vector.iter().fold(T::zero(), |acc, x| acc.max(x.abs())),
    }
}
