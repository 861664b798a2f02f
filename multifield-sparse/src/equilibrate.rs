use nalgebra::{DVector, RealField};
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/// Scaling strategy for the combined linear system.
///
/// Coupled multi-field systems mix blocks of wildly different physical magnitude,
/// which degrades the conditioning of the combined operator. Equilibration rescales
/// rows and/or columns by the inverse of their infinity norm before the solve.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EquilibrationMethod {
    None,
    Rows,
    Columns,
    RowsAndColumns,
}

impl Default for EquilibrationMethod {
    fn default() -> Self {
        EquilibrationMethod::None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EquilibrationError {
    /// A matrix row contains no nonzero entry, so no row scale exists.
    ZeroRow(usize),
    /// A matrix column contains no nonzero entry, so no column scale exists.
    ZeroColumn(usize),
    /// A vector length does not match the equilibrated system.
    DimensionMismatch { expected: usize, found: usize },
}

impl fmt::Display for EquilibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EquilibrationError::ZeroRow(row) => {
                write!(f, "Cannot equilibrate: row {} of the matrix is zero.", row)
            }
            EquilibrationError::ZeroColumn(col) => {
                write!(f, "Cannot equilibrate: column {} of the matrix is zero.", col)
            }
            EquilibrationError::DimensionMismatch { expected, found } => {
                write!(
                    f,
                    "Vector dimension {} does not match the equilibrated system dimension {}.",
                    found, expected
                )
            }
        }
    }
}

impl Error for EquilibrationError {}

/// Row/column rescaling of a combined system by inverse infinity norms.
///
/// Row scaling multiplies matrix and right-hand side rows in place and leaves the
/// solution untouched. Column scaling changes the solution variable, so the column
/// scales are kept and must be applied to the computed increment afterwards via
/// [`unequilibrate_increment`](Equilibration::unequilibrate_increment).
#[derive(Debug, Clone)]
pub struct Equilibration<T> {
    method: EquilibrationMethod,
    col_scales: Option<DVector<T>>,
}

impl<T: RealField> Equilibration<T> {
    pub fn new(method: EquilibrationMethod) -> Self {
        Self {
            method,
            col_scales: None,
        }
    }

    pub fn method(&self) -> EquilibrationMethod {
        self.method
    }

    /// Rescales the matrix and right-hand side in place according to the chosen method.
    ///
    /// Must be called anew for every solve; the stored column scales belong to the most
    /// recently equilibrated system.
    pub fn equilibrate_system(
        &mut self,
        matrix: &mut CsrMatrix<T>,
        rhs: &mut DVector<T>,
    ) -> Result<(), EquilibrationError> {
        self.col_scales = None;
        match self.method {
            EquilibrationMethod::None => Ok(()),
            EquilibrationMethod::Rows => self.equilibrate_rows(matrix, rhs),
            EquilibrationMethod::Columns => self.equilibrate_columns(matrix),
            EquilibrationMethod::RowsAndColumns => {
                self.equilibrate_rows(matrix, rhs)?;
                self.equilibrate_columns(matrix)
            }
        }
    }

    /// Transforms an increment of the equilibrated system back to the original
    /// variables. A no-op unless columns were scaled.
    pub fn unequilibrate_increment(
        &self,
        increment: &mut DVector<T>,
    ) -> Result<(), EquilibrationError> {
        if let Some(scales) = &self.col_scales {
            if increment.len() != scales.len() {
                return Err(EquilibrationError::DimensionMismatch {
                    expected: scales.len(),
                    found: increment.len(),
                });
            }
            increment.component_mul_assign(scales);
        }
        Ok(())
    }

    fn equilibrate_rows(
        &mut self,
        matrix: &mut CsrMatrix<T>,
        rhs: &mut DVector<T>,
    ) -> Result<(), EquilibrationError> {
        let mut scales = DVector::zeros(matrix.nrows());
        for (i, _, value) in matrix.triplet_iter() {
            let magnitude = value.clone().abs();
            if magnitude > scales[i] {
                scales[i] = magnitude;
            }
        }
        for (i, scale) in scales.iter_mut().enumerate() {
            if scale.is_zero() {
                return Err(EquilibrationError::ZeroRow(i));
            }
            *scale = T::one() / scale.clone();
        }
        for (i, _, value) in matrix.triplet_iter_mut() {
            *value *= scales[i].clone();
        }
        rhs.component_mul_assign(&scales);
        Ok(())
    }

    fn equilibrate_columns(&mut self, matrix: &mut CsrMatrix<T>) -> Result<(), EquilibrationError> {
        let mut scales = DVector::zeros(matrix.ncols());
        for (_, j, value) in matrix.triplet_iter() {
            let magnitude = value.clone().abs();
            if magnitude > scales[j] {
                scales[j] = magnitude;
            }
        }
        for (j, scale) in scales.iter_mut().enumerate() {
            if scale.is_zero() {
                return Err(EquilibrationError::ZeroColumn(j));
            }
            *scale = T::one() / scale.clone();
        }
        for (_, j, value) in matrix.triplet_iter_mut() {
            *value *= scales[j].clone();
        }
        self.col_scales = Some(scales);
        Ok(())
    }
}
