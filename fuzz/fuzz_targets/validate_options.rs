#![no_main]

use arbitrary::Arbitrary;
use numbridge_integrate::{
    ToleranceValue, validate_first_step, validate_max_step, validate_t_eval, validate_tol,
};
use numbridge_runtime::RuntimeMode;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct OptionsInput {
    n: u8,
    hardened: bool,
    atol_vector: bool,
    rtol: f64,
    atol_values: Vec<f64>,
    first_step: f64,
    t0: f64,
    t_bound: f64,
    max_step: f64,
    t_eval: Vec<f64>,
}

fuzz_target!(|input: OptionsInput| {
    let mode = if input.hardened {
        RuntimeMode::Hardened
    } else {
        RuntimeMode::Strict
    };
    let clipped = input.atol_values.iter().copied().take(8).collect::<Vec<_>>();
    let atol = if input.atol_vector {
        ToleranceValue::Vector(clipped)
    } else {
        ToleranceValue::Scalar(clipped.first().copied().unwrap_or(0.0))
    };
    if let Ok(validated) = validate_tol(input.rtol, atol, usize::from(input.n), mode) {
        assert!(validated.rtol >= numbridge_integrate::MIN_RTOL && validated.rtol.is_finite());
        match &validated.atol {
            ToleranceValue::Scalar(a) => assert!(a.is_finite() && *a >= 0.0),
            ToleranceValue::Vector(v) => assert!(v.iter().all(|a| a.is_finite() && *a >= 0.0)),
        }
    }
    let _ = validate_first_step(input.first_step, input.t0, input.t_bound);
    let _ = validate_max_step(input.max_step);
    let _ = validate_t_eval(&input.t_eval, (input.t0, input.t_bound));
});
