//! Linear solver interface for the combined system.

use crate::Real;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use std::error::Error;
use std::fmt;

/// Per-solve hints handed to the linear solver by the nonlinear driver.
#[derive(Debug, Clone)]
pub struct SolverParams<T> {
    /// The matrix changed since the last solve and any factorization must be redone.
    pub refactor: bool,
    /// A new nonlinear solve started; cached data from the previous one is stale.
    pub reset: bool,
    /// When present, the solver may relax its tolerance based on the current
    /// nonlinear residual.
    pub adaptive_tolerance: Option<AdaptiveTolerance<T>>,
}

impl<T> Default for SolverParams<T> {
    fn default() -> Self {
        Self {
            refactor: true,
            reset: false,
            adaptive_tolerance: None,
        }
    }
}

/// Adaptive linear tolerance hint, in the manner of inexact Newton methods: while the
/// nonlinear residual is far from its tolerance, the linear system need not be solved
/// much more accurately than the nonlinear error it feeds into.
#[derive(Debug, Clone)]
pub struct AdaptiveTolerance<T> {
    /// The convergence tolerance of the outer nonlinear solve.
    pub nonlin_tolerance: T,
    /// The current nonlinear residual of the outer solve.
    pub nonlin_residual: T,
    /// Factor by which the linear solve should be more accurate than the
    /// nonlinear tolerance demands.
    pub better: T,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinearSolverError {
    /// The factorization failed; the combined matrix is singular (or close enough
    /// that the factorization broke down).
    SingularMatrix,
    DimensionMismatch { matrix: (usize, usize), rhs: usize },
}

impl fmt::Display for LinearSolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinearSolverError::SingularMatrix => {
                write!(f, "Linear solve failed: the combined system matrix is singular.")
            }
            LinearSolverError::DimensionMismatch { matrix, rhs } => {
                write!(
                    f,
                    "Linear solve failed: matrix is {}x{} but right-hand side has length {}.",
                    matrix.0, matrix.1, rhs
                )
            }
        }
    }
}

impl Error for LinearSolverError {}

/// A solver for the combined linear system of one Newton iteration.
pub trait LinearSolver<T: Real> {
    fn solve(
        &mut self,
        matrix: &CsrMatrix<T>,
        rhs: &DVector<T>,
        params: &SolverParams<T>,
    ) -> Result<DVector<T>, LinearSolverError>;

    /// Discards any adaptively relaxed tolerance. Called by the driver after every
    /// solve so a relaxed tolerance never leaks into an unrelated system.
    fn reset_tolerance(&mut self) {}
}

/// Direct solver based on a dense LU factorization of the combined matrix.
///
/// Adequate for the combined systems of small and moderately sized coupled problems,
/// which are square, nonsymmetric and indefinite in general. Ignores the adaptive
/// tolerance hint, as a direct solve is always exact.
#[derive(Debug, Default)]
pub struct DenseDirectSolver;

impl<T: Real> LinearSolver<T> for DenseDirectSolver {
    fn solve(
        &mut self,
        matrix: &CsrMatrix<T>,
        rhs: &DVector<T>,
        _params: &SolverParams<T>,
    ) -> Result<DVector<T>, LinearSolverError> {
        if matrix.nrows() != rhs.len() || matrix.nrows() != matrix.ncols() {
            return Err(LinearSolverError::DimensionMismatch {
                matrix: (matrix.nrows(), matrix.ncols()),
                rhs: rhs.len(),
            });
        }
        let dense = DMatrix::from(matrix);
        dense
            .lu()
            .solve(rhs)
            .ok_or(LinearSolverError::SingularMatrix)
    }
}
