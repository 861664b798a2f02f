//! The monolithic Newton driver for coupled multi-field problems.

use crate::fdcheck::FdCheck;
use crate::field::{CouplingOperator, FieldSolver};
use crate::norms::{vector_norm, VectorNorm};
use crate::solver::{AdaptiveTolerance, LinearSolver, SolverParams};
use crate::sparse::{apply_dirichlet, zero_rows, BlockMatrix, DofMapExtractor, Equilibration, EquilibrationMethod};
use crate::Real;
use eyre::{bail, eyre, WrapErr};
use itertools::Itertools;
use log::{debug, info, warn};
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Configuration of the monolithic Newton solve.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewtonConfig<T> {
    pub max_iterations: usize,
    /// Number of iterations taken unconditionally. At least one iteration is always
    /// needed, since the convergence check trivially passes before any norms exist.
    pub min_iterations: usize,
    /// Tolerance on the relative increment norms of all fields.
    pub tol_increment: T,
    /// Tolerance on the residual norms (per field and combined).
    pub tol_residual: T,
    pub norm_residual: VectorNorm,
    pub norm_increment: VectorNorm,
    /// Relax the linear solver tolerance while the nonlinear error is still large.
    pub adapt_solver_tolerance: bool,
    /// Factor by which the linear solve must beat the nonlinear tolerance when
    /// adaptive tolerances are active.
    pub adapt_tol_better: T,
    pub equilibration: EquilibrationMethod,
    /// Finite-difference verification of the assembled linearization. Debug tool,
    /// prohibitively expensive on anything but small problems.
    pub fd_check: FdCheck,
}

impl<T: Real> Default for NewtonConfig<T> {
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    fn default() -> Self {
        Self {
            max_iterations: 10,
            min_iterations: 1,
            tol_increment: 1e-8,
            tol_residual: 1e-8,
            norm_residual: VectorNorm::L2,
            norm_increment: VectorNorm::L2,
            adapt_solver_tolerance: false,
            adapt_tol_better: 0.1,
            equilibration: EquilibrationMethod::None,
            fd_check: FdCheck::None,
        }
    }
}

/// Outcome of a time step solve.
///
/// Running out of iterations is a reported outcome, not an error: the caller decides
/// whether to accept the step, cut the step size or abort.
#[derive(Clone, Debug, PartialEq)]
pub enum NewtonStatus<T> {
    Converged {
        iterations: usize,
    },
    MaxIterationsReached {
        iterations: usize,
        max_increment: T,
        max_residual: T,
    },
}

/// Norms of the most recent Newton iteration.
///
/// Increment norms are relative: each field's increment norm is divided by the norm of
/// the field's iterate, with a floor on the denominator so near-zero states do not
/// inflate the quotient.
#[derive(Clone, Debug)]
pub struct ConvergenceNorms<T> {
    /// Residual norm per field.
    pub residual: Vec<T>,
    /// Residual norm of the combined right-hand side.
    pub combined_residual: T,
    /// Relative increment norm per field.
    pub increment: Vec<T>,
    pub max_residual: T,
    pub max_increment: T,
}

impl<T: Real> ConvergenceNorms<T> {
    fn zeros(num_fields: usize) -> Self {
        Self {
            residual: vec![T::zero(); num_fields],
            combined_residual: T::zero(),
            increment: vec![T::zero(); num_fields],
            max_residual: T::zero(),
            max_increment: T::zero(),
        }
    }
}

/// Couples a set of field solvers into one combined Newton iteration.
///
/// Per iteration the driver applies the previous increment to every field, propagates
/// the updated iterates between the fields, re-evaluates every field, gathers diagonal
/// and coupling blocks into the combined operator and takes a single Newton step on
/// the combined system.
pub struct MonolithicSolver<T: Real> {
    pub(crate) fields: Vec<Box<dyn FieldSolver<T>>>,
    pub(crate) couplings: Vec<Box<dyn CouplingOperator<T>>>,
    pub(crate) config: NewtonConfig<T>,
    linear_solver: Box<dyn LinearSolver<T>>,
    pub(crate) map: DofMapExtractor,
    pub(crate) system: BlockMatrix<T>,
    pub(crate) rhs: DVector<T>,
    pub(crate) increment: DVector<T>,
    /// Dirichlet-constrained DOFs in combined numbering.
    pub(crate) dirichlet: Vec<usize>,
    equilibration: Equilibration<T>,
    norms: ConvergenceNorms<T>,
    /// Wall-clock seconds of the last evaluation/assembly and the last linear solve.
    dt_evaluate: f64,
    dt_solve: f64,
}

impl<T: Real> MonolithicSolver<T> {
    pub fn new(
        fields: Vec<Box<dyn FieldSolver<T>>>,
        couplings: Vec<Box<dyn CouplingOperator<T>>>,
        config: NewtonConfig<T>,
        linear_solver: Box<dyn LinearSolver<T>>,
    ) -> eyre::Result<Self> {
        if fields.is_empty() {
            bail!("A monolithic solver needs at least one field.");
        }
        if let Some(name) = fields.iter().map(|field| field.name()).duplicates().next() {
            bail!("Field name \"{}\" is not unique.", name);
        }
        if config.min_iterations > config.max_iterations {
            bail!(
                "min_iterations ({}) exceeds max_iterations ({}).",
                config.min_iterations,
                config.max_iterations
            );
        }

        let sizes: Vec<_> = fields.iter().map(|field| field.num_dofs()).collect();
        let map = DofMapExtractor::from_block_sizes(&sizes)?;
        let mut system = BlockMatrix::new(map.clone(), map.clone())?;
        for coupling in &couplings {
            let (row, col) = (coupling.row_field(), coupling.col_field());
            if row == col {
                bail!(
                    "Coupling operator targets diagonal block ({}, {}), \
                     which belongs to the field's own Jacobian.",
                    row,
                    col
                );
            }
            system.require(row, col)?;
        }

        let mut dirichlet = Vec::new();
        for (index, field) in fields.iter().enumerate() {
            for &local in field.dirichlet_dofs() {
                dirichlet.push(map.local_to_global(index, local)?);
            }
        }

        let full_dim = map.full_dim();
        let equilibration = Equilibration::new(config.equilibration);
        let num_fields = fields.len();
        Ok(Self {
            fields,
            couplings,
            config,
            linear_solver,
            map,
            system,
            rhs: DVector::zeros(full_dim),
            increment: DVector::zeros(full_dim),
            dirichlet,
            equilibration,
            norms: ConvergenceNorms::zeros(num_fields),
            dt_evaluate: 0.0,
            dt_solve: 0.0,
        })
    }

    pub fn fields(&self) -> &[Box<dyn FieldSolver<T>>] {
        &self.fields
    }

    pub fn norms(&self) -> &ConvergenceNorms<T> {
        &self.norms
    }

    /// Runs the Newton iteration for one time step.
    ///
    /// The convergence check trivially passes before any norms have been built, so
    /// `min_iterations` guarantees that at least that many iterations actually run.
    /// On convergence the final increment is applied to the fields without another
    /// evaluation, so the fields hold the converged iterate afterwards.
    pub fn solve_time_step(&mut self) -> eyre::Result<NewtonStatus<T>> {
        self.increment.fill(T::zero());
        self.norms = ConvergenceNorms::zeros(self.fields.len());
        self.print_header();

        let mut iteration = 0;
        while (!self.converged() && iteration < self.config.max_iterations)
            || iteration < self.config.min_iterations
        {
            iteration += 1;
            self.evaluate()
                .wrap_err_with(|| format!("Evaluation failed in iteration {}.", iteration))?;
            self.linear_solve(iteration)
                .wrap_err_with(|| format!("Linear solve failed in iteration {}.", iteration))?;
            self.build_convergence_norms()?;
            self.print_iteration(iteration);
        }

        if self.converged() {
            self.update_fields_after_convergence()?;
            Ok(NewtonStatus::Converged {
                iterations: iteration,
            })
        } else {
            warn!(
                "Newton iteration did not converge within {} iterations \
                 (max increment {:?}, max residual {:?}).",
                iteration, self.norms.max_increment, self.norms.max_residual
            );
            Ok(NewtonStatus::MaxIterationsReached {
                iterations: iteration,
                max_increment: self.norms.max_increment,
                max_residual: self.norms.max_residual,
            })
        }
    }

    /// Completes the time step by handing the converged iterate to every field.
    pub fn advance_time_step(&mut self) {
        for field in &mut self.fields {
            field.advance_time_step();
        }
    }

    /// Applies the current increment, propagates iterates between the fields,
    /// re-evaluates every field and assembles the combined operator and right-hand side.
    pub(crate) fn evaluate(&mut self) -> eyre::Result<()> {
        self.evaluate_inner()?;
        if self.config.fd_check == FdCheck::Global {
            self.fd_check()?;
        }
        Ok(())
    }

    pub(crate) fn evaluate_inner(&mut self) -> eyre::Result<()> {
        let now = Instant::now();
        for (index, field) in self.fields.iter_mut().enumerate() {
            let slice = self.map.extract_vector(&self.increment, index)?;
            field.update_iterate(slice.as_view());
        }
        self.propagate_states();
        for field in &mut self.fields {
            field
                .evaluate()
                .wrap_err_with(|| format!("Evaluation of field \"{}\" failed.", field.name()))?;
        }
        for field in &self.fields {
            if field.residual().iter().any(|value| !is_finite(*value)) {
                return Err(eyre!(
                    "Residual of field \"{}\" contains non-finite entries.",
                    field.name()
                ));
            }
        }
        self.assemble_system()?;
        self.assemble_rhs()?;
        self.dt_evaluate = now.elapsed().as_secs_f64();
        debug!(
            "Evaluation and assembly of the combined system took {:.2e} s.",
            self.dt_evaluate
        );
        Ok(())
    }

    /// Hands every field the current iterates of all other fields.
    fn propagate_states(&mut self) {
        let states: Vec<(String, DVector<T>)> = self
            .fields
            .iter()
            .map(|field| (field.name().to_string(), field.state().clone()))
            .collect();
        for (receiver, field) in self.fields.iter_mut().enumerate() {
            for (sender, (name, state)) in states.iter().enumerate() {
                if sender != receiver {
                    field.receive_state(name, state.as_view());
                }
            }
        }
    }

    fn assemble_system(&mut self) -> eyre::Result<()> {
        self.system.zero();
        for (index, field) in self.fields.iter().enumerate() {
            self.system.assign(index, index, field.jacobian().clone())?;
        }
        for coupling in &mut self.couplings {
            let (row, col) = (coupling.row_field(), coupling.col_field());
            let coo = coupling.assemble(&self.fields).wrap_err_with(|| {
                format!("Assembly of coupling block ({}, {}) failed.", row, col)
            })?;
            let mut block = CsrMatrix::from(&coo);
            // Rows of constrained DOFs must not couple to other fields.
            zero_rows(&mut block, self.fields[row].dirichlet_dofs())?;
            self.system.assign(row, col, block)?;
        }
        self.system.complete()?;
        Ok(())
    }

    fn assemble_rhs(&mut self) -> eyre::Result<()> {
        for (index, field) in self.fields.iter().enumerate() {
            let negated = -field.residual().clone();
            self.map.insert_vector(negated.as_view(), index, &mut self.rhs)?;
        }
        Ok(())
    }

    /// Solves the combined system for the next increment.
    fn linear_solve(&mut self, iteration: usize) -> eyre::Result<()> {
        let now = Instant::now();
        let mut matrix = self.system.merge()?;
        let mut rhs = self.rhs.clone();
        apply_dirichlet(&mut matrix, &mut rhs, &self.dirichlet)?;
        self.equilibration.equilibrate_system(&mut matrix, &mut rhs)?;

        let adaptive_tolerance = (self.config.adapt_solver_tolerance && iteration > 1)
            .then(|| AdaptiveTolerance {
                nonlin_tolerance: self.config.tol_residual,
                nonlin_residual: self.norms.max_increment.max(self.norms.max_residual),
                better: self.config.adapt_tol_better,
            });
        let params = SolverParams {
            refactor: true,
            reset: iteration == 1,
            adaptive_tolerance,
        };

        let mut solution = self.linear_solver.solve(&matrix, &rhs, &params)?;
        self.equilibration.unequilibrate_increment(&mut solution)?;
        self.linear_solver.reset_tolerance();
        self.increment = solution;
        self.dt_solve = now.elapsed().as_secs_f64();
        debug!("Linear solve of the combined system took {:.2e} s.", self.dt_solve);
        Ok(())
    }

    #[replace_float_literals(T::from_f64(literal).unwrap())]
    fn build_convergence_norms(&mut self) -> eyre::Result<()> {
        let num_fields = self.fields.len();
        let mut norms = ConvergenceNorms::zeros(num_fields);
        for (index, field) in self.fields.iter().enumerate() {
            norms.residual[index] =
                vector_norm(self.config.norm_residual, field.residual().as_view());

            let slice = self.map.extract_vector(&self.increment, index)?;
            let mut state_norm = vector_norm(self.config.norm_increment, field.state().as_view());
            // Relative increments make no sense against a (near-)zero state.
            if state_norm < 1e-6 {
                state_norm = 1.0;
            }
            norms.increment[index] =
                vector_norm(self.config.norm_increment, slice.as_view()) / state_norm;
        }
        norms.combined_residual = vector_norm(self.config.norm_residual, self.rhs.as_view());
        norms.max_residual = norms
            .residual
            .iter()
            .fold(norms.combined_residual, |acc, &x| acc.max(x));
        norms.max_increment = norms.increment.iter().fold(T::zero(), |acc, &x| acc.max(x));
        self.norms = norms;
        Ok(())
    }

    fn converged(&self) -> bool {
        self.norms.max_increment < self.config.tol_increment
            && self.norms.max_residual < self.config.tol_residual
    }

    /// Applies the final increment to the fields without another evaluation, so the
    /// fields end the step holding the converged iterate.
    fn update_fields_after_convergence(&mut self) -> eyre::Result<()> {
        for (index, field) in self.fields.iter_mut().enumerate() {
            let slice = self.map.extract_vector(&self.increment, index)?;
            field.update_iterate(slice.as_view());
        }
        self.propagate_states();
        Ok(())
    }

    fn print_header(&self) {
        let names = self.fields.iter().map(|field| field.name()).join(", ");
        info!(
            "Monolithic Newton over fields [{}]: residual norm {} (tol {:?}), \
             increment norm {} (tol {:?})",
            names,
            self.config.norm_residual.label(),
            self.config.tol_residual,
            self.config.norm_increment.label(),
            self.config.tol_increment
        );
    }

    fn print_iteration(&self, iteration: usize) {
        let residuals = self
            .fields
            .iter()
            .zip(&self.norms.residual)
            .map(|(field, norm)| format!("{}: {:?}", field.name(), norm))
            .join(", ");
        let increments = self
            .fields
            .iter()
            .zip(&self.norms.increment)
            .map(|(field, norm)| format!("{}: {:?}", field.name(), norm))
            .join(", ");
        info!(
            "Iteration {:3}/{} | residual {:?} [{}] | increment [{}] | te {:.2e} s | ts {:.2e} s",
            iteration,
            self.config.max_iterations,
            self.norms.combined_residual,
            residuals,
            increments,
            self.dt_evaluate,
            self.dt_solve
        );
    }
}

fn is_finite<T: Real>(value: T) -> bool {
    if value != value {
        return false;
    }
    match T::max_value() {
        Some(max) => value.abs() <= max,
        None => true,
    }
}
