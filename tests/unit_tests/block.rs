use super::csr_from_dense;
use matrixcompare::assert_matrix_eq;
use multifield::sparse::{apply_dirichlet, zero_rows, BlockMatrix, BlockMatrixError, DofMapExtractor};
use nalgebra::{DMatrix, DVector};

fn two_by_two_partition() -> DofMapExtractor {
    DofMapExtractor::from_block_sizes(&[2, 1]).unwrap()
}

#[test]
fn completion_fails_naming_the_first_missing_block() {
    let map = two_by_two_partition();
    let mut system = BlockMatrix::<f64>::new(map.clone(), map).unwrap();
    system.require(0, 1).unwrap();
    system
        .assign(0, 0, csr_from_dense(&DMatrix::identity(2, 2)))
        .unwrap();
    system
        .assign(0, 1, csr_from_dense(&DMatrix::from_element(2, 1, 1.0)))
        .unwrap();

    assert_eq!(
        system.complete(),
        Err(BlockMatrixError::UnassignedBlock { row: 1, col: 1 })
    );
}

#[test]
fn merge_places_blocks_at_their_partition_offsets() {
    let map = two_by_two_partition();
    let mut system = BlockMatrix::new(map.clone(), map).unwrap();
    let a00 = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 0.0, 3.0]);
    let a01 = DMatrix::from_row_slice(2, 1, &[4.0, 5.0]);
    let a11 = DMatrix::from_element(1, 1, 6.0);
    system.assign(0, 0, csr_from_dense(&a00)).unwrap();
    system.require(0, 1).unwrap();
    system.assign(0, 1, csr_from_dense(&a01)).unwrap();
    system.assign(1, 1, csr_from_dense(&a11)).unwrap();
    system.complete().unwrap();

    let merged = DMatrix::from(&system.merge().unwrap());
    let expected = DMatrix::from_row_slice(
        3,
        3,
        &[
            2.0, 1.0, 4.0, //
            0.0, 3.0, 5.0, //
            0.0, 0.0, 6.0,
        ],
    );
    assert_matrix_eq!(merged, expected, comp = float);
}

#[test]
fn merge_keeps_the_diagonal_structurally_present() {
    // The diagonal block has a structurally missing diagonal entry, yet the merged
    // matrix must still allow pinning that row.
    let map = DofMapExtractor::from_block_sizes(&[2]).unwrap();
    let mut system = BlockMatrix::new(map.clone(), map).unwrap();
    let a = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 1.0, 0.0]);
    system.assign(0, 0, csr_from_dense(&a)).unwrap();
    system.complete().unwrap();

    let mut merged = system.merge().unwrap();
    let mut rhs = DVector::from_column_slice(&[1.0, 2.0]);
    apply_dirichlet(&mut merged, &mut rhs, &[0]).unwrap();

    let dense = DMatrix::from(&merged);
    // The diagonal of this matrix is entirely zero, so the fallback scale 1 is used.
    assert_eq!(dense[(0, 0)], 1.0);
    assert_eq!(dense[(0, 1)], 0.0);
    assert_eq!(rhs[0], 0.0);
    assert_eq!(rhs[1], 2.0);
}

#[test]
fn zeroing_resets_assignments() {
    let map = two_by_two_partition();
    let mut system = BlockMatrix::new(map.clone(), map).unwrap();
    system
        .assign(0, 0, csr_from_dense(&DMatrix::identity(2, 2)))
        .unwrap();
    assert!(system.is_assigned(0, 0));
    system.zero();
    assert!(!system.is_assigned(0, 0));
    // Completion now fails again until the diagonal blocks are re-assigned.
    assert!(system.complete().is_err());
}

#[test]
fn assign_rejects_mismatched_dimensions() {
    let map = two_by_two_partition();
    let mut system = BlockMatrix::new(map.clone(), map).unwrap();
    let result = system.assign(0, 0, csr_from_dense(&DMatrix::identity(3, 3)));
    assert_eq!(
        result,
        Err(BlockMatrixError::BlockDimensionMismatch {
            row: 0,
            col: 0,
            expected: (2, 2),
            found: (3, 3),
        })
    );
}

#[test]
fn zero_rows_clears_values_but_not_the_pattern() {
    let mut matrix = csr_from_dense(&DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]));
    zero_rows(&mut matrix, &[1]).unwrap();
    let dense = DMatrix::from(&matrix);
    assert_eq!(dense[(0, 0)], 1.0);
    assert_eq!(dense[(0, 1)], 2.0);
    assert_eq!(dense[(1, 0)], 0.0);
    assert_eq!(dense[(1, 1)], 0.0);
    assert_eq!(matrix.nnz(), 4);
}

#[test]
fn zero_rows_rejects_out_of_range_rows() {
    let mut matrix = csr_from_dense(&DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]));
    assert_eq!(
        zero_rows(&mut matrix, &[5]),
        Err(BlockMatrixError::RowIndexOutOfRange { row: 5, nrows: 2 })
    );
}

#[test]
fn apply_dirichlet_uses_a_representative_diagonal_scale() {
    let dense = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 4.0]);
    let mut matrix = csr_from_dense(&dense);
    let mut rhs = DVector::from_column_slice(&[1.0, 2.0]);
    apply_dirichlet(&mut matrix, &mut rhs, &[1]).unwrap();

    let pinned = DMatrix::from(&matrix);
    assert_eq!(pinned[(1, 0)], 0.0);
    assert_eq!(pinned[(1, 1)], 4.0);
    assert_eq!(rhs[1], 0.0);
    // Unconstrained rows are untouched.
    assert_eq!(pinned[(0, 0)], 4.0);
    assert_eq!(pinned[(0, 1)], 1.0);
    assert_eq!(rhs[0], 1.0);
}
