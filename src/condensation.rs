//! Per-element static condensation for trace-based (hybridized) discretizations.
//!
//! In a hybridized DG discretization only the trace unknowns on element faces enter
//! the global system. The element-interior unknowns, a scalar part and a gradient
//! part, are eliminated element by element: the interior system is inverted locally,
//! its Schur complement onto the trace DOFs forms the condensed element matrix, and
//! after the global solve the interior unknowns are recovered from the trace values.
//!
//! The local system of one element has the block structure
//!
//! ```text
//! [ AM   B  C ] [x]   [s]
//! [-Bᵀ   D  E ] [y] = [t]      AM = A + M / (dt·θ)
//! [ G    Eᵀ H ] [λ]   [u]
//! ```
//!
//! where `x` and `y` are the interior unknowns, `λ` the traces, and `M` the mass
//! matrix of the scalar part (absent for quasi-static problems).

use crate::Real;
use nalgebra::{DMatrix, DVector, DVectorView};
use rayon::prelude::*;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CondensationError {
    /// The (shifted) interior block `AM` of an element is not invertible.
    SingularInteriorBlock { element_id: usize },
    /// The interior Schur complement of an element is not invertible.
    SingularSchurComplement { element_id: usize },
    /// The element mapping is inverted or collapsed.
    DegenerateGeometry { element_id: usize },
    /// A local block has dimensions inconsistent with the others.
    BlockDimensionMismatch {
        element_id: usize,
        block: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    },
    /// `dt * theta` must be positive.
    InvalidTimeIntegration { element_id: usize },
}

impl fmt::Display for CondensationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CondensationError::SingularInteriorBlock { element_id } => {
                write!(
                    f,
                    "Interior block of element {} is singular. For a stationary problem \
                     this typically means the element has no reaction or mass contribution \
                     to pin the interior scalar.",
                    element_id
                )
            }
            CondensationError::SingularSchurComplement { element_id } => {
                write!(
                    f,
                    "Interior Schur complement of element {} is singular.",
                    element_id
                )
            }
            CondensationError::DegenerateGeometry { element_id } => {
                write!(
                    f,
                    "Element {} has a non-positive Jacobian determinant; \
                     its mapping is inverted or collapsed.",
                    element_id
                )
            }
            CondensationError::BlockDimensionMismatch {
                element_id,
                block,
                expected,
                found,
            } => {
                write!(
                    f,
                    "Block {} of element {} has dimensions {}x{}, expected {}x{}.",
                    block, element_id, found.0, found.1, expected.0, expected.1
                )
            }
            CondensationError::InvalidTimeIntegration { element_id } => {
                write!(
                    f,
                    "Condensation of element {}: dt * theta must be positive.",
                    element_id
                )
            }
        }
    }
}

impl Error for CondensationError {}

/// The local blocks of one element, as produced by the element integration.
///
/// Any reaction linearization is expected to be folded into `a` by the caller;
/// source terms enter only the scalar right-hand side.
#[derive(Debug, Clone)]
pub struct LocalBlocks<T> {
    /// Scalar-scalar block (stiffness, convection, reaction).
    pub a: DMatrix<T>,
    /// Scalar-gradient block.
    pub b: DMatrix<T>,
    /// Scalar-trace block.
    pub c: DMatrix<T>,
    /// Gradient-gradient block.
    pub d: DMatrix<T>,
    /// Gradient-trace block.
    pub e: DMatrix<T>,
    /// Trace-scalar block.
    pub g: DMatrix<T>,
    /// Trace-trace block.
    pub h: DMatrix<T>,
    /// Scalar mass matrix; `None` for quasi-static problems.
    pub m: Option<DMatrix<T>>,
}

/// The factorized interior system of one element.
///
/// Solves `[AM, B; -Bᵀ, D] [x; y] = [s; t]` through the Schur complement
/// `S = D + Bᵀ AM⁻¹ B` of the shifted scalar block.
#[derive(Debug, Clone)]
pub struct LocalCondensation<T> {
    inv_am: DMatrix<T>,
    /// `-Bᵀ AM⁻¹`, reused in both the solve and the trace condensation.
    neg_bt_am: DMatrix<T>,
    inv_schur: DMatrix<T>,
    b: DMatrix<T>,
}

impl<T: Real> LocalCondensation<T> {
    /// Builds the interior factorization, shifting the scalar block by `M / (dt·θ)`
    /// when a mass matrix is present.
    pub fn new(
        element_id: usize,
        a: &DMatrix<T>,
        b: &DMatrix<T>,
        d: &DMatrix<T>,
        m: Option<&DMatrix<T>>,
        dt_theta: T,
    ) -> Result<Self, CondensationError> {
        if dt_theta <= T::zero() {
            return Err(CondensationError::InvalidTimeIntegration { element_id });
        }
        let am = match m {
            Some(m) => a + m / dt_theta,
            None => a.clone(),
        };
        let inv_am = am
            .try_inverse()
            .ok_or(CondensationError::SingularInteriorBlock { element_id })?;
        let neg_bt_am = -b.transpose() * &inv_am;
        let schur = d - &neg_bt_am * b;
        let inv_schur = schur
            .try_inverse()
            .ok_or(CondensationError::SingularSchurComplement { element_id })?;
        Ok(Self {
            inv_am,
            neg_bt_am,
            inv_schur,
            b: b.clone(),
        })
    }

    /// Solves the interior system for the given right-hand sides.
    pub fn solve(&self, s: DVectorView<T>, t: DVectorView<T>) -> (DVector<T>, DVector<T>) {
        let y = &self.inv_schur * (t - &self.neg_bt_am * s);
        let x = &self.inv_am * (s - &self.b * &y);
        (x, y)
    }
}

/// A fully condensed element: the trace-space operator plus everything needed to
/// build the condensed right-hand side and to recover the interior unknowns.
#[derive(Debug, Clone)]
pub struct CondensedElement<T> {
    base: LocalCondensation<T>,
    c: DMatrix<T>,
    e: DMatrix<T>,
    g: DMatrix<T>,
    k: DMatrix<T>,
    dt_theta: T,
}

impl<T: Real> CondensedElement<T> {
    /// The condensed trace-space matrix `K = dt·θ (H - G·X - Eᵀ·Y)`, where `X` and
    /// `Y` map trace values to interior unknowns.
    pub fn reduced_matrix(&self) -> &DMatrix<T> {
        &self.k
    }

    /// The condensed trace-space right-hand side for the interior loads `(s, t)` and
    /// the trace load `u`.
    pub fn reduced_rhs(
        &self,
        s: DVectorView<T>,
        t: DVectorView<T>,
        u: DVectorView<T>,
    ) -> DVector<T> {
        let (x0, y0) = self.base.solve(s, t);
        (u - &self.g * x0 - self.e.transpose() * y0) * self.dt_theta
    }

    /// Recovers the interior unknowns of this element from the solved trace values
    /// by back-substitution: the trace contribution is moved to the interior
    /// right-hand sides and the interior system is solved once more.
    ///
    /// `(s, t)` are the same interior loads that were passed to
    /// [`reduced_rhs`](CondensedElement::reduced_rhs).
    pub fn recover_interior(
        &self,
        s: DVectorView<T>,
        t: DVectorView<T>,
        trace: DVectorView<T>,
    ) -> (DVector<T>, DVector<T>) {
        let s_int = s - &self.c * trace;
        let t_int = t - &self.e * trace;
        self.base.solve(s_int.as_view(), t_int.as_view())
    }
}

/// Condenses one element of a transient problem integrated with a one-step-theta
/// scheme with step size `dt` and parameter `theta`.
pub fn condense_trace<T: Real>(
    element_id: usize,
    blocks: &LocalBlocks<T>,
    dt: T,
    theta: T,
) -> Result<CondensedElement<T>, CondensationError> {
    condense(element_id, blocks, blocks.m.as_ref(), dt * theta)
}

/// Condenses one element of a quasi-static problem. Any mass block is ignored.
pub fn condense_static<T: Real>(
    element_id: usize,
    blocks: &LocalBlocks<T>,
) -> Result<CondensedElement<T>, CondensationError> {
    condense(element_id, blocks, None, T::one())
}

fn condense<T: Real>(
    element_id: usize,
    blocks: &LocalBlocks<T>,
    m: Option<&DMatrix<T>>,
    dt_theta: T,
) -> Result<CondensedElement<T>, CondensationError> {
    let n_scalar = blocks.a.nrows();
    let n_gradient = blocks.d.nrows();
    let n_trace = blocks.h.nrows();
    let expectations: [(&'static str, &DMatrix<T>, (usize, usize)); 7] = [
        ("A", &blocks.a, (n_scalar, n_scalar)),
        ("B", &blocks.b, (n_scalar, n_gradient)),
        ("C", &blocks.c, (n_scalar, n_trace)),
        ("D", &blocks.d, (n_gradient, n_gradient)),
        ("E", &blocks.e, (n_gradient, n_trace)),
        ("G", &blocks.g, (n_trace, n_scalar)),
        ("H", &blocks.h, (n_trace, n_trace)),
    ];
    for (block, matrix, expected) in expectations {
        if matrix.shape() != expected {
            return Err(CondensationError::BlockDimensionMismatch {
                element_id,
                block,
                expected,
                found: matrix.shape(),
            });
        }
    }
    if let Some(m) = m {
        if m.shape() != (n_scalar, n_scalar) {
            return Err(CondensationError::BlockDimensionMismatch {
                element_id,
                block: "M",
                expected: (n_scalar, n_scalar),
                found: m.shape(),
            });
        }
    }

    let base = LocalCondensation::new(element_id, &blocks.a, &blocks.b, &blocks.d, m, dt_theta)?;
    let y_op = &base.inv_schur * (&blocks.e - &base.neg_bt_am * &blocks.c);
    let x_op = &base.inv_am * (&blocks.c - &blocks.b * &y_op);
    let k = (&blocks.h - &blocks.g * x_op - blocks.e.transpose() * y_op) * dt_theta;
    Ok(CondensedElement {
        base,
        c: blocks.c.clone(),
        e: blocks.e.clone(),
        g: blocks.g.clone(),
        k,
        dt_theta,
    })
}

/// Aborts on inverted or collapsed element mappings before any local solve is
/// attempted.
pub fn check_element_jacobian<T: Real>(
    element_id: usize,
    det: T,
) -> Result<(), CondensationError> {
    if det <= T::zero() {
        return Err(CondensationError::DegenerateGeometry { element_id });
    }
    Ok(())
}

/// Condenses a batch of elements in parallel.
pub fn condense_trace_batch<T: Real>(
    elements: &[(usize, LocalBlocks<T>)],
    dt: T,
    theta: T,
) -> Result<Vec<CondensedElement<T>>, CondensationError> {
    elements
        .par_iter()
        .map(|(element_id, blocks)| condense_trace(*element_id, blocks, dt, theta))
        .collect()
}
