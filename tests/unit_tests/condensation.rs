use matrixcompare::assert_matrix_eq;
use multifield::condensation::{
    check_element_jacobian, condense_static, condense_trace, condense_trace_batch,
    CondensationError, LocalBlocks,
};
use nalgebra::{DMatrix, DVector};

/// Well-conditioned local blocks with 2 scalar, 2 gradient and 3 trace DOFs.
fn sample_blocks() -> LocalBlocks<f64> {
    LocalBlocks {
        a: DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 0.5, 3.0]),
        b: DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.5, 1.0]),
        c: DMatrix::from_row_slice(2, 3, &[1.0, 0.0, 0.5, 0.0, 1.0, 0.25]),
        d: DMatrix::from_row_slice(2, 2, &[5.0, 1.0, 1.0, 4.0]),
        e: DMatrix::from_row_slice(2, 3, &[0.5, 1.0, 0.0, 0.25, 0.0, 1.0]),
        g: DMatrix::from_row_slice(3, 2, &[1.0, 0.5, 0.0, 1.0, 0.5, 0.0]),
        h: DMatrix::from_row_slice(3, 3, &[6.0, 1.0, 0.0, 1.0, 5.0, 0.5, 0.0, 0.5, 7.0]),
        m: None,
    }
}

/// Assembles the full uncondensed element system
/// `[[AM, B, C], [-Bᵀ, D, E], [G, Eᵀ, H]]` for cross-checking against the
/// condensed operator.
fn full_system(blocks: &LocalBlocks<f64>, dt_theta: f64) -> DMatrix<f64> {
    let n1 = blocks.a.nrows();
    let n2 = blocks.d.nrows();
    let nt = blocks.h.nrows();
    let n = n1 + n2 + nt;
    let am = match &blocks.m {
        Some(m) => &blocks.a + m / dt_theta,
        None => blocks.a.clone(),
    };
    let mut full = DMatrix::zeros(n, n);
    full.view_mut((0, 0), (n1, n1)).copy_from(&am);
    full.view_mut((0, n1), (n1, n2)).copy_from(&blocks.b);
    full.view_mut((0, n1 + n2), (n1, nt)).copy_from(&blocks.c);
    full.view_mut((n1, 0), (n2, n1)).copy_from(&(-blocks.b.transpose()));
    full.view_mut((n1, n1), (n2, n2)).copy_from(&blocks.d);
    full.view_mut((n1, n1 + n2), (n2, nt)).copy_from(&blocks.e);
    full.view_mut((n1 + n2, 0), (nt, n1)).copy_from(&blocks.g);
    full.view_mut((n1 + n2, n1), (nt, n2))
        .copy_from(&blocks.e.transpose());
    full.view_mut((n1 + n2, n1 + n2), (nt, nt)).copy_from(&blocks.h);
    full
}

#[test]
fn condensed_traces_match_the_uncondensed_solve() {
    let blocks = sample_blocks();
    let condensed = condense_static(7, &blocks).unwrap();

    let s = DVector::from_column_slice(&[1.0, -2.0]);
    let t = DVector::from_column_slice(&[0.5, 1.5]);
    let u = DVector::from_column_slice(&[2.0, -1.0, 0.5]);

    let full = full_system(&blocks, 1.0);
    let mut load = DVector::zeros(7);
    load.rows_mut(0, 2).copy_from(&s);
    load.rows_mut(2, 2).copy_from(&t);
    load.rows_mut(4, 3).copy_from(&u);
    let monolithic = full.lu().solve(&load).unwrap();

    let rhs = condensed.reduced_rhs(s.as_view(), t.as_view(), u.as_view());
    let trace = condensed
        .reduced_matrix()
        .clone()
        .lu()
        .solve(&rhs)
        .unwrap();
    assert_matrix_eq!(trace, monolithic.rows(4, 3), comp = abs, tol = 1e-12);

    let (x, y) = condensed.recover_interior(s.as_view(), t.as_view(), trace.as_view());
    assert_matrix_eq!(x, monolithic.rows(0, 2), comp = abs, tol = 1e-12);
    assert_matrix_eq!(y, monolithic.rows(2, 2), comp = abs, tol = 1e-12);
}

#[test]
fn decoupled_interior_blocks_condense_exactly() {
    // With B = 0 the Schur complement degenerates to D and the condensed operator has
    // the closed form K = H - G A⁻¹ C - Eᵀ D⁻¹ E.
    let mut blocks = sample_blocks();
    blocks.a = DMatrix::from_diagonal(&DVector::from_column_slice(&[2.0, 4.0]));
    blocks.d = DMatrix::from_diagonal(&DVector::from_column_slice(&[5.0, 2.5]));
    blocks.b = DMatrix::zeros(2, 2);
    let condensed = condense_static(0, &blocks).unwrap();

    let inv_a = blocks.a.clone().try_inverse().unwrap();
    let inv_d = blocks.d.clone().try_inverse().unwrap();
    let expected =
        &blocks.h - &blocks.g * inv_a * &blocks.c - blocks.e.transpose() * inv_d * &blocks.e;
    assert_matrix_eq!(
        condensed.reduced_matrix().clone(),
        expected,
        comp = abs,
        tol = 1e-13
    );
}

#[test]
fn transient_condensation_shifts_the_scalar_block_by_the_mass_matrix() {
    let mut blocks = sample_blocks();
    blocks.m = Some(DMatrix::from_row_slice(2, 2, &[2.0, 0.25, 0.25, 1.5]));
    let (dt, theta) = (0.1, 0.5);
    let condensed = condense_trace(3, &blocks, dt, theta).unwrap();

    let s = DVector::from_column_slice(&[1.0, 0.0]);
    let t = DVector::from_column_slice(&[-1.0, 2.0]);
    let u = DVector::from_column_slice(&[0.0, 1.0, -0.5]);

    // The dt*theta prefactor of the condensed operator cancels against the one of the
    // condensed right-hand side, so the trace solution matches the uncondensed system
    // with the shifted scalar block.
    let full = full_system(&blocks, dt * theta);
    let mut load = DVector::zeros(7);
    load.rows_mut(0, 2).copy_from(&s);
    load.rows_mut(2, 2).copy_from(&t);
    load.rows_mut(4, 3).copy_from(&u);
    let monolithic = full.lu().solve(&load).unwrap();

    let rhs = condensed.reduced_rhs(s.as_view(), t.as_view(), u.as_view());
    let trace = condensed
        .reduced_matrix()
        .clone()
        .lu()
        .solve(&rhs)
        .unwrap();
    assert_matrix_eq!(trace, monolithic.rows(4, 3), comp = abs, tol = 1e-11);

    // Back-substitution must reproduce the interior solution of the uncondensed
    // system for the same loads, also away from dt*theta = 1.
    let (x, y) = condensed.recover_interior(s.as_view(), t.as_view(), trace.as_view());
    assert_matrix_eq!(x, monolithic.rows(0, 2), comp = abs, tol = 1e-11);
    assert_matrix_eq!(y, monolithic.rows(2, 2), comp = abs, tol = 1e-11);
}

#[test]
fn quasi_static_condensation_equals_unit_step_transient_condensation() {
    let blocks = sample_blocks();
    let without_mass = condense_static(0, &blocks).unwrap();
    let transient = condense_trace(0, &blocks, 1.0, 1.0).unwrap();
    assert_matrix_eq!(
        without_mass.reduced_matrix().clone(),
        transient.reduced_matrix().clone(),
        comp = float
    );
}

#[test]
fn singular_interior_blocks_name_the_element() {
    let mut blocks = sample_blocks();
    blocks.a = DMatrix::zeros(2, 2);
    let result = condense_static(42, &blocks);
    assert_eq!(
        result.err(),
        Some(CondensationError::SingularInteriorBlock { element_id: 42 })
    );
}

#[test]
fn mismatched_block_dimensions_are_rejected() {
    let mut blocks = sample_blocks();
    blocks.e = DMatrix::zeros(3, 3);
    let result = condense_static(5, &blocks);
    assert_eq!(
        result.err(),
        Some(CondensationError::BlockDimensionMismatch {
            element_id: 5,
            block: "E",
            expected: (2, 3),
            found: (3, 3),
        })
    );
}

#[test]
fn non_positive_time_integration_factors_are_rejected() {
    let blocks = sample_blocks();
    let result = condense_trace(1, &blocks, 0.0, 0.5);
    assert_eq!(
        result.err(),
        Some(CondensationError::InvalidTimeIntegration { element_id: 1 })
    );
}

#[test]
fn degenerate_element_mappings_are_rejected() {
    assert!(check_element_jacobian(0, 0.5).is_ok());
    assert_eq!(
        check_element_jacobian(9, -1e-12).err(),
        Some(CondensationError::DegenerateGeometry { element_id: 9 })
    );
    assert_eq!(
        check_element_jacobian(9, 0.0).err(),
        Some(CondensationError::DegenerateGeometry { element_id: 9 })
    );
}

#[test]
fn batched_condensation_matches_the_sequential_result() {
    let elements: Vec<_> = (0..4).map(|id| (id, sample_blocks())).collect();
    let batch = condense_trace_batch(&elements, 0.1, 0.5).unwrap();
    assert_eq!(batch.len(), 4);
    let reference = condense_trace(0, &elements[0].1, 0.1, 0.5).unwrap();
    for condensed in &batch {
        assert_matrix_eq!(
            condensed.reduced_matrix().clone(),
            reference.reduced_matrix().clone(),
            comp = float
        );
    }
}

#[test]
fn batched_condensation_propagates_element_failures() {
    let mut blocks = sample_blocks();
    blocks.a = DMatrix::zeros(2, 2);
    let elements = vec![(0, sample_blocks()), (1, blocks)];
    let result = condense_trace_batch(&elements, 0.1, 0.5);
    assert_eq!(
        result.err(),
        Some(CondensationError::SingularInteriorBlock { element_id: 1 })
    );
}
