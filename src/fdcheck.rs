//! Finite-difference verification of the assembled linearization.

use crate::monolithic::MonolithicSolver;
use crate::Real;
use eyre::bail;
use log::{info, warn};
use nalgebra::DVector;
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};

/// Whether to verify the combined operator against a finite-difference approximation
/// after every assembly.
///
/// The check perturbs the fields one DOF at a time and re-evaluates the whole coupled
/// problem per column, so it costs one full evaluation per unconstrained DOF. It exists
/// to hunt down missing or wrong linearization terms on small debug problems.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FdCheck {
    None,
    Global,
}

impl Default for FdCheck {
    fn default() -> Self {
        FdCheck::None
    }
}

impl<T: Real> MonolithicSolver<T> {
    /// Compares the assembled combined operator against a column-wise finite-difference
    /// approximation of the residual.
    ///
    /// Fields are left in the state they were in before the check: the probe increment
    /// of each column also undoes the previous column's perturbation, and a final
    /// evaluation undoes the last one.
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    pub(crate) fn fd_check(&mut self) -> eyre::Result<()> {
        let delta = 1e-8;
        let abs_tol = 1e-5;
        let rel_tol = 1e-4;

        let dim = self.map.full_dim();
        let reference = self.system.merge()?;
        let rhs_old = self.rhs.clone();
        let saved_increment = self.increment.clone();

        let mut constrained = vec![false; dim];
        for &dof in &self.dirichlet {
            constrained[dof] = true;
        }

        let mut failures = 0usize;
        let mut checked = 0usize;
        let mut max_abs_error = 0.0;
        let mut max_rel_error = 0.0;
        let mut previous = None;
        for dof in (0..dim).filter(|dof| !constrained[*dof]) {
            let mut probe = DVector::zeros(dim);
            if let Some(prev) = previous {
                probe[prev] = -delta;
            }
            probe[dof] = delta;
            self.increment = probe;
            self.evaluate_inner()?;
            previous = Some(dof);

            // The right-hand side is the negated residual, so the operator column is
            // the negated finite difference of the right-hand side.
            for row in (0..dim).filter(|row| !constrained[*row]) {
                let approx = -(self.rhs[row] - rhs_old[row]) / delta;
                let assembled = reference
                    .get_entry(row, dof)
                    .map(|entry| entry.into_value())
                    .unwrap_or_else(T::zero);
                let abs_error = (assembled - approx).abs();
                let scale = assembled.abs().max(approx.abs());
                let rel_error = if scale > 0.0 { abs_error / scale } else { abs_error };
                max_abs_error = max_abs_error.max(abs_error);
                max_rel_error = max_rel_error.max(rel_error);
                if abs_error > abs_tol && rel_error > rel_tol {
                    warn!(
                        "Linearization mismatch at ({}, {}): assembled {:?}, \
                         finite difference {:?} (abs error {:?}, rel error {:?}).",
                        row, dof, assembled, approx, abs_error, rel_error
                    );
                    failures += 1;
                }
                checked += 1;
            }
        }

        // Undo the last perturbation so fields, operator and right-hand side are back
        // at the original linearization point.
        if let Some(prev) = previous {
            let mut probe = DVector::zeros(dim);
            probe[prev] = -delta;
            self.increment = probe;
            self.evaluate_inner()?;
        }
        self.increment = saved_increment;

        if failures > 0 {
            bail!(
                "Finite-difference check of the combined operator failed for {} of {} entries.",
                failures,
                checked
            );
        }
        info!(
            "Finite-difference check of the combined operator passed ({} entries, \
             max abs error {:?}, max rel error {:?}).",
            checked, max_abs_error, max_rel_error
        );
        Ok(())
    }
}
