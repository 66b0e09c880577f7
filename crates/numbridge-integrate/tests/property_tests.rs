//! Property tests for the integration adapters.
//!
//! Convention: test_{module}_{function}_{scenario}
//!
//! Seed replay: `PROPTEST_CASES=1000 cargo test -p numbridge-integrate --test property_tests`
//! Reproduce: `PROPTEST_SEED=<seed> cargo test -p numbridge-integrate --test property_tests`

use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut};
use numbridge_dense::{RowMajor, SharedMatrix};
use numbridge_integrate::{
    DenseMatrixAdapter, IntegrateOptions, IntegratorOptions, LinearSolverAdapter, MIN_RTOL,
    MultistepMethod, ToleranceValue, VectorAdapter, integrate, validate_first_step,
    validate_max_step, validate_t_eval, validate_tol,
};
use numbridge_runtime::{RuntimeMode, TestLogEntry, TestResult};
use proptest::prelude::*;

fn matrix_strategy(max_dim: usize) -> impl Strategy<Value = DMatrix<f64>> {
    (1..=max_dim, 1..=max_dim).prop_flat_map(|(r, c)| {
        prop::collection::vec(-100.0f64..100.0, r * c)
            .prop_map(move |data| DMatrix::from_vec(r, c, data))
    })
}

/// Strictly diagonally dominant, hence nonsingular.
fn dominant_strategy(max_dim: usize) -> impl Strategy<Value = DMatrix<f64>> {
    (1..=max_dim).prop_flat_map(|n| {
        prop::collection::vec(-1.0f64..1.0, n * n).prop_map(move |data| {
            let mut m = DMatrix::from_vec(n, n, data);
            for i in 0..n {
                m[(i, i)] += n as f64 + 1.0;
            }
            m
        })
    })
}

// ═══════════════════════════════════════════════════════════════
// Property 1: validate_tol passes rtol >= MIN_RTOL through unchanged
// ═══════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn test_validation_tol_no_clamp_when_rtol_above_min(
        rtol in MIN_RTOL..1.0,
        atol in 1e-15f64..1.0,
        n in 1usize..50,
    ) {
        let validated = validate_tol(rtol, ToleranceValue::Scalar(atol), n, RuntimeMode::Strict)
            .expect("valid tolerances should not fail");
        prop_assert!(validated.warnings.is_empty(), "{:?}", validated.warnings);
        prop_assert_eq!(validated.rtol, rtol);
    }

    #[test]
    fn test_validation_tol_always_clamps_below_min_rtol(
        rtol in 0.0f64..MIN_RTOL,
        n in 1usize..50,
    ) {
        let validated = validate_tol(rtol, ToleranceValue::Scalar(1e-8), n, RuntimeMode::Strict)
            .expect("clamping is not an error");
        prop_assert_eq!(validated.rtol, MIN_RTOL);
        prop_assert_eq!(validated.warnings.len(), 1);
    }

    #[test]
    fn test_validation_tol_vector_atol_length_must_match(
        n in 1usize..30,
        len in 1usize..30,
    ) {
        let result = validate_tol(1e-6, ToleranceValue::Vector(vec![1e-9; len]), n, RuntimeMode::Strict);
        prop_assert_eq!(result.is_ok(), n == len);
    }
}

// ═══════════════════════════════════════════════════════════════
// Property 2: step options
// ═══════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn test_validation_first_step_iff_in_bounds(
        h in -1.0f64..20.0,
        t0 in -50.0f64..50.0,
        span in -10.0f64..10.0,
    ) {
        let ok = validate_first_step(h, t0, t0 + span).is_ok();
        prop_assert_eq!(ok, h > 0.0 && h <= ((t0 + span) - t0).abs());
    }

    #[test]
    fn test_validation_max_step_sign(step in -1e10f64..1e10) {
        prop_assert_eq!(validate_max_step(step).is_ok(), step > 0.0);
    }

    #[test]
    fn test_validation_t_eval_sorted_inside_span_accepted(
        mut points in prop::collection::vec(0.0f64..10.0, 0..20),
        backward in any::<bool>(),
    ) {
        points.sort_by(f64::total_cmp);
        points.dedup();
        let span = if backward {
            points.reverse();
            (10.0, 0.0)
        } else {
            (0.0, 10.0)
        };
        prop_assert!(validate_t_eval(&points, span).is_ok());
        if points.len() >= 2 {
            points.swap(0, 1);
            prop_assert!(validate_t_eval(&points, span).is_err());
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// Property 3: matrix adapters preserve values and column pointers
// ═══════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn test_dense_matrix_from_expr_matches_source(m in matrix_strategy(8)) {
        let adapter = DenseMatrixAdapter::from_expr(&m);
        prop_assert_eq!(adapter.shape(), m.shape());
        prop_assert!(adapter.column_pointers_consistent());
        prop_assert_eq!(adapter.to_dmatrix(), m);
    }

    #[test]
    fn test_dense_matrix_row_major_source_is_transposed_correctly(m in matrix_strategy(8)) {
        let shared = SharedMatrix::<RowMajor>::from_fn(m.nrows(), m.ncols(), |r, c| m[(r, c)]);
        let adapter = DenseMatrixAdapter::from_expr(&shared);
        prop_assert!(!adapter.is_aliased());
        prop_assert!(adapter.column_pointers_consistent());
        prop_assert_eq!(adapter.to_dmatrix(), m.clone());
    }

    #[test]
    fn test_dense_matrix_alias_keeps_storage(mut m in matrix_strategy(8)) {
        let expected = m.clone();
        let address = m.as_ptr();
        let adapter = DenseMatrixAdapter::alias(&mut m);
        prop_assert!(adapter.is_aliased());
        prop_assert_eq!(adapter.data_ptr(), address);
        prop_assert_eq!(adapter.to_dmatrix(), expected);
    }
}

// ═══════════════════════════════════════════════════════════════
// Property 4: the native LU solve agrees with nalgebra
// ═══════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn test_linear_solver_matches_nalgebra_lu(
        a in dominant_strategy(7),
        seed in prop::collection::vec(-10.0f64..10.0, 7),
    ) {
        let n = a.nrows();
        let b = DVector::from_column_slice(&seed[..n]);
        let expected = a.clone().lu().solve(&b).expect("dominant matrices are nonsingular");

        let template = VectorAdapter::zeros(n);
        let mut ls = LinearSolverAdapter::new(&template, DenseMatrixAdapter::zeros(n, n))
            .expect("square shapes match");
        ls.setup(&a).expect("factorization succeeds");
        let mut x = b.as_slice().to_vec();
        ls.solve(&mut x).expect("solve succeeds");
        for (got, want) in x.iter().zip(expected.iter()) {
            prop_assert!((got - want).abs() <= 1e-9 * (1.0 + want.abs()), "{got} vs {want}");
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// Property 5: exponential decay is reproduced for any rate and start
// ═══════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_integrate_decay_tracks_closed_form(
        y0 in 0.1f64..10.0,
        rate in 0.1f64..3.0,
        adams in any::<bool>(),
    ) {
        let rhs = move |_t: f64, y: DVectorView<'_, f64>, mut dy: DVectorViewMut<'_, f64>| {
            dy.copy_from(&(-rate * y));
            Ok(())
        };
        let result = integrate(
            rhs,
            None,
            &IntegrateOptions {
                t_span: (0.0, 1.0),
                y0: vec![y0],
                t_eval: Some(vec![1.0]),
                integrator: IntegratorOptions {
                    method: if adams { MultistepMethod::Adams } else { MultistepMethod::Bdf },
                    rtol: 1e-6,
                    atol: ToleranceValue::Scalar(1e-10),
                    max_steps: 50_000,
                    ..IntegratorOptions::default()
                },
            },
        )
        .expect("valid options");
        prop_assert!(result.success, "{}", result.message);
        let expected = y0 * (-rate).exp();
        let got = result.y[0][0];
        prop_assert!((got - expected).abs() <= 5e-3 * y0, "{got} vs {expected}");
    }
}

// ═══════════════════════════════════════════════════════════════
// Structured logging convention test
// ═══════════════════════════════════════════════════════════════

#[test]
fn test_integrate_structured_log_convention() {
    let entry = TestLogEntry::new(
        "test_integrate_decay_tracks_closed_form",
        "numbridge_integrate",
        "property test: decay matched over 32 cases",
    )
    .with_result(TestResult::Pass)
    .with_seed(32)
    .with_mode(RuntimeMode::Strict);

    let json = entry.to_json_line();
    let parsed: serde_json::Value =
        serde_json::from_str(&json).expect("structured log must be valid JSON");
    assert!(parsed["test_id"].is_string());
    assert!(parsed["timestamp_ms"].is_number());
    assert_eq!(parsed["level"], "info");
    assert_eq!(parsed["module"], "numbridge_integrate");
    assert_eq!(parsed["seed"], 32);
}
