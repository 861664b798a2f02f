//! Interfaces between single-field solvers and the monolithic driver.

use crate::Real;
use nalgebra::{DVector, DVectorView};
use nalgebra_sparse::{CooMatrix, CsrMatrix};

/// A single-field nonlinear problem participating in a monolithic solve.
///
/// Each field owns its iterate, residual and (diagonal-block) Jacobian. The driver
/// follows a strict per-iteration protocol:
///
/// 1. [`update_iterate`](FieldSolver::update_iterate) adds this field's slice of the
///    combined Newton increment to the iterate,
/// 2. [`receive_state`](FieldSolver::receive_state) hands the field the updated
///    iterates of the other fields,
/// 3. [`evaluate`](FieldSolver::evaluate) recomputes residual and Jacobian at the new
///    linearization point,
/// 4. [`residual`](FieldSolver::residual) and [`jacobian`](FieldSolver::jacobian) are
///    read during assembly and must stay constant between evaluations.
///
/// The residual convention is `F(x) = 0`: the driver assembles the right-hand side as
/// the negated residual.
pub trait FieldSolver<T: Real> {
    /// A short identifier for diagnostics and for [`receive_state`](FieldSolver::receive_state)
    /// dispatch. Must be unique within a monolithic solver.
    fn name(&self) -> &str;

    /// Number of DOFs this field contributes to the combined system.
    fn num_dofs(&self) -> usize;

    /// The current iterate of this field.
    fn state(&self) -> &DVector<T>;

    /// The residual `F(x)` at the last evaluated linearization point.
    fn residual(&self) -> &DVector<T>;

    /// The Jacobian `dF/dx` at the last evaluated linearization point.
    fn jacobian(&self) -> &CsrMatrix<T>;

    /// Adds this field's slice of the combined Newton increment to the iterate.
    fn update_iterate(&mut self, increment: DVectorView<T>);

    /// Receives the updated iterate of another field, identified by its name.
    ///
    /// Fields that do not depend on `from` can ignore the call; the default does.
    fn receive_state(&mut self, from: &str, state: DVectorView<T>) {
        let _ = (from, state);
    }

    /// Recomputes residual and Jacobian at the current linearization point.
    fn evaluate(&mut self) -> eyre::Result<()>;

    /// Field-local indices of Dirichlet-constrained DOFs.
    ///
    /// Constrained DOFs are pinned in the combined system so their increments vanish.
    fn dirichlet_dofs(&self) -> &[usize] {
        &[]
    }

    /// Accepts the converged iterate as the state of the completed time step.
    fn advance_time_step(&mut self) {}
}

/// An off-diagonal coupling block of the combined Jacobian.
///
/// A coupling operator linearizes the residual of field `row_field` with respect to
/// the DOFs of field `col_field`. It is re-assembled every Newton iteration, after all
/// fields have been evaluated, and may change its sparsity pattern between iterations.
pub trait CouplingOperator<T: Real> {
    fn row_field(&self) -> usize;

    fn col_field(&self) -> usize;

    /// Assembles the coupling block at the fields' current linearization points.
    ///
    /// The result must have dimensions `fields[row_field].num_dofs()` by
    /// `fields[col_field].num_dofs()`.
    fn assemble(&mut self, fields: &[Box<dyn FieldSolver<T>>]) -> eyre::Result<CooMatrix<T>>;
}
