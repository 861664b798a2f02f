use crate::extractor::DofMapExtractor;
use nalgebra::{DVector, RealField};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rustc_hash::FxHashSet;
use std::cmp::min;
use std::error::Error;
use std::fmt;

/// A sparse operator logically partitioned into `n × n` per-field blocks.
///
/// Diagonal blocks hold each field's own Jacobian; off-diagonal blocks hold the
/// coupling sensitivities between pairs of fields. All diagonal blocks, plus every
/// block registered via [`require`](BlockMatrix::require), must be assigned before the
/// operator can be completed and merged. Blocks are re-assigned from scratch every
/// assembly pass, so a change of sparsity pattern between nonlinear iterations (e.g.
/// a changed active set) is tolerated.
#[derive(Debug, Clone)]
pub struct BlockMatrix<T> {
    row_map: DofMapExtractor,
    col_map: DofMapExtractor,
    blocks: Vec<Option<CsrMatrix<T>>>,
    required: FxHashSet<(usize, usize)>,
    completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockMatrixError {
    /// The row and column partitions must have the same number of blocks.
    PartitionMismatch { rows: usize, cols: usize },
    BlockIndexOutOfRange { row: usize, col: usize, num_blocks: usize },
    /// The assigned matrix does not match the dimensions the partition prescribes
    /// for this block.
    BlockDimensionMismatch {
        row: usize,
        col: usize,
        expected: (usize, usize),
        found: (usize, usize),
    },
    /// A required block was never assigned before completion.
    UnassignedBlock { row: usize, col: usize },
    /// The operator must be completed before it can be merged.
    NotCompleted,
    /// A Dirichlet-constrained row has no structural diagonal entry to pin.
    MissingDiagonalEntry { row: usize },
    RowIndexOutOfRange { row: usize, nrows: usize },
}

impl fmt::Display for BlockMatrixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockMatrixError::PartitionMismatch { rows, cols } => {
                write!(
                    f,
                    "Row partition has {} blocks but column partition has {}.",
                    rows, cols
                )
            }
            BlockMatrixError::BlockIndexOutOfRange { row, col, num_blocks } => {
                write!(
                    f,
                    "Block ({}, {}) is out of range for a {}x{} block operator.",
                    row, col, num_blocks, num_blocks
                )
            }
            BlockMatrixError::BlockDimensionMismatch { row, col, expected, found } => {
                write!(
                    f,
                    "Block ({}, {}) has dimensions {}x{} but the partition prescribes {}x{}.",
                    row, col, found.0, found.1, expected.0, expected.1
                )
            }
            BlockMatrixError::UnassignedBlock { row, col } => {
                write!(
                    f,
                    "Cannot complete the block operator: required block ({}, {}) \
                     was never assigned.",
                    row, col
                )
            }
            BlockMatrixError::NotCompleted => {
                write!(f, "The block operator must be completed before it can be merged.")
            }
            BlockMatrixError::MissingDiagonalEntry { row } => {
                write!(
                    f,
                    "Constrained row {} has no structural diagonal entry to pin.",
                    row
                )
            }
            BlockMatrixError::RowIndexOutOfRange { row, nrows } => {
                write!(f, "Row index {} is out of range for {} rows.", row, nrows)
            }
        }
    }
}

impl Error for BlockMatrixError {}

impl<T: RealField> BlockMatrix<T> {
    /// Creates an empty block operator over the given row/column partitions.
    ///
    /// All diagonal blocks are implicitly required.
    pub fn new(row_map: DofMapExtractor, col_map: DofMapExtractor) -> Result<Self, BlockMatrixError> {
        if row_map.num_blocks() != col_map.num_blocks() {
            return Err(BlockMatrixError::PartitionMismatch {
                rows: row_map.num_blocks(),
                cols: col_map.num_blocks(),
            });
        }
        let n = row_map.num_blocks();
        let required = (0..n).map(|i| (i, i)).collect();
        Ok(Self {
            row_map,
            col_map,
            blocks: vec![None; n * n],
            required,
            completed: false,
        })
    }

    pub fn num_blocks(&self) -> usize {
        self.row_map.num_blocks()
    }

    pub fn row_map(&self) -> &DofMapExtractor {
        &self.row_map
    }

    pub fn col_map(&self) -> &DofMapExtractor {
        &self.col_map
    }

    fn check_indices(&self, row: usize, col: usize) -> Result<(), BlockMatrixError> {
        let n = self.num_blocks();
        if row >= n || col >= n {
            return Err(BlockMatrixError::BlockIndexOutOfRange { row, col, num_blocks: n });
        }
        Ok(())
    }

    /// Marks an off-diagonal block as required for completion.
    pub fn require(&mut self, row: usize, col: usize) -> Result<(), BlockMatrixError> {
        self.check_indices(row, col)?;
        self.required.insert((row, col));
        Ok(())
    }

    /// Assigns a block, checking its dimensions against the partition.
    pub fn assign(
        &mut self,
        row: usize,
        col: usize,
        block: CsrMatrix<T>,
    ) -> Result<(), BlockMatrixError> {
        self.check_indices(row, col)?;
        let expected = (
            self.row_map.block_size(row).unwrap(),
            self.col_map.block_size(col).unwrap(),
        );
        let found = (block.nrows(), block.ncols());
        if expected != found {
            return Err(BlockMatrixError::BlockDimensionMismatch { row, col, expected, found });
        }
        let n = self.num_blocks();
        self.blocks[row * n + col] = Some(block);
        self.completed = false;
        Ok(())
    }

    pub fn is_assigned(&self, row: usize, col: usize) -> bool {
        let n = self.num_blocks();
        row < n && col < n && self.blocks[row * n + col].is_some()
    }

    /// Drops all assigned blocks and the completion state, so the operator can be
    /// rebuilt with a possibly different sparsity pattern.
    pub fn zero(&mut self) {
        for block in &mut self.blocks {
            *block = None;
        }
        self.completed = false;
    }

    /// Finalizes the operator. Fails with a diagnostic naming the first missing
    /// required block.
    pub fn complete(&mut self) -> Result<(), BlockMatrixError> {
        let n = self.num_blocks();
        let mut missing: Vec<_> = self
            .required
            .iter()
            .copied()
            .filter(|&(row, col)| self.blocks[row * n + col].is_none())
            .collect();
        missing.sort_unstable();
        if let Some(&(row, col)) = missing.first() {
            return Err(BlockMatrixError::UnassignedBlock { row, col });
        }
        self.completed = true;
        Ok(())
    }

    /// Builds the combined sparse operator over the full index space.
    ///
    /// The main diagonal is kept structurally present even where no block contributes
    /// a value, so that constrained rows can later be pinned.
    pub fn merge(&self) -> Result<CsrMatrix<T>, BlockMatrixError> {
        if !self.completed {
            return Err(BlockMatrixError::NotCompleted);
        }
        let nrows = self.row_map.full_dim();
        let ncols = self.col_map.full_dim();
        let n = self.num_blocks();
        let mut coo = CooMatrix::new(nrows, ncols);
        for row in 0..n {
            let row_offset = self.row_map.block_range(row).unwrap().start;
            for col in 0..n {
                let col_offset = self.col_map.block_range(col).unwrap().start;
                if let Some(block) = &self.blocks[row * n + col] {
                    for (i, j, value) in block.triplet_iter() {
                        coo.push(row_offset + i, col_offset + j, value.clone());
                    }
                }
            }
        }
        for i in 0..min(nrows, ncols) {
            coo.push(i, i, T::zero());
        }
        Ok(CsrMatrix::from(&coo))
    }
}

/// Zeroes the given rows of a sparse matrix, keeping the sparsity pattern.
///
/// Used for the Dirichlet rows of off-diagonal coupling blocks, which must be zeroed
/// only after the coupling assembly so valid entries of unconstrained rows survive.
pub fn zero_rows<T: RealField>(
    matrix: &mut CsrMatrix<T>,
    rows: &[usize],
) -> Result<(), BlockMatrixError> {
    let nrows = matrix.nrows();
    for &row in rows {
        if row >= nrows {
            return Err(BlockMatrixError::RowIndexOutOfRange { row, nrows });
        }
        for value in matrix.row_mut(row).values_mut() {
            *value = T::zero();
        }
    }
    Ok(())
}

/// Applies homogeneous Dirichlet conditions to the combined system.
///
/// Constrained rows are zeroed except for the diagonal entry, which is set to a
/// representative scale (the first nonzero diagonal entry of the matrix; plain 1 would
/// ignore the scaling of the system and can hurt the condition number). The matching
/// right-hand side entries are zeroed so constrained DOFs produce a zero increment.
pub fn apply_dirichlet<T: RealField>(
    matrix: &mut CsrMatrix<T>,
    rhs: &mut DVector<T>,
    dofs: &[usize],
) -> Result<(), BlockMatrixError> {
    let nrows = matrix.nrows();
    let scale = (0..min(nrows, matrix.ncols()))
        .filter_map(|i| matrix.get_entry(i, i).map(|entry| entry.into_value()))
        .find(|value| !value.is_zero())
        .map(|value| value.abs())
        .unwrap_or_else(T::one);

    for &dof in dofs {
        if dof >= nrows {
            return Err(BlockMatrixError::RowIndexOutOfRange { row: dof, nrows });
        }
        let mut row = matrix.row_mut(dof);
        let (cols, values) = row.cols_and_values_mut();
        let mut diagonal_found = false;
        for (local, &col) in cols.iter().enumerate() {
            if col == dof {
                values[local] = scale.clone();
                diagonal_found = true;
            } else {
                values[local] = T::zero();
            }
        }
        if !diagonal_found {
            return Err(BlockMatrixError::MissingDiagonalEntry { row: dof });
        }
        rhs[dof] = T::zero();
    }
    Ok(())
}
