#![forbid(unsafe_code)]

use nalgebra::{DVectorView, DVectorViewMut};
use serde::{Deserialize, Serialize};

use crate::callback::{CallbackResult, Jacobian};
use crate::validation::{validate_first_step, validate_t_eval};
use crate::{IntegrateError, Integrator, IntegratorOptions, VectorAdapter};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrateOptions {
    pub t_span: (f64, f64),
    pub y0: Vec<f64>,
    /// Output times; every internal step is reported when `None`.
    pub t_eval: Option<Vec<f64>>,
    pub integrator: IntegratorOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrateResult {
    pub t: Vec<f64>,
    /// `y[i]` is the state at `t[i]`.
    pub y: Vec<Vec<f64>>,
    pub nfev: u64,
    pub njev: u64,
    pub nlu: u64,
    pub nsteps: u64,
    pub status: i32,
    pub message: String,
    pub success: bool,
}

const MSG_SUCCESS: &str = "The solver successfully reached the end of the integration interval.";

/// Integrate `y' = rhs(t, y)` over `t_span`.
///
/// Construction problems (bad options, shapes, allocation) are returned as
/// `Err`. A failure while stepping still returns the points computed so far,
/// with `success == false` and the native status in `status`.
pub fn integrate<'f, F>(
    rhs: F,
    jacobian: Option<Jacobian<'f>>,
    options: &IntegrateOptions,
) -> Result<IntegrateResult, IntegrateError>
where
    F: FnMut(f64, DVectorView<'_, f64>, DVectorViewMut<'_, f64>) -> CallbackResult + 'f,
{
    let (t0, tf) = options.t_span;
    if let Some(h) = options.integrator.first_step {
        validate_first_step(h, t0, tf)?;
    }
    if let Some(t_eval) = &options.t_eval {
        validate_t_eval(t_eval, options.t_span)?;
    }

    let mut integrator = Integrator::new(
        options.integrator.clone(),
        t0,
        VectorAdapter::owned(options.y0.clone()),
        rhs,
        jacobian,
    )?;

    let mut ts = Vec::new();
    let mut ys = Vec::new();
    let outcome = match &options.t_eval {
        Some(t_eval) => sample(&mut integrator, t_eval, &mut ts, &mut ys),
        None => follow_steps(&mut integrator, tf, &mut ts, &mut ys),
    };

    let stats = integrator.stats();
    let (status, message, success) = match outcome {
        Ok(()) => (0, MSG_SUCCESS.to_owned(), true),
        Err(err) => {
            log::debug!("integrate stopped at t = {}: {err}", integrator.t());
            (err.status().unwrap_or(-1), err.to_string(), false)
        }
    };
    integrator.finish();

    Ok(IntegrateResult {
        t: ts,
        y: ys,
        nfev: stats.rhs_evals,
        njev: stats.jac_evals,
        nlu: stats.lin_setups,
        nsteps: stats.steps,
        status,
        message,
        success,
    })
}

fn sample(
    integrator: &mut Integrator<'_>,
    t_eval: &[f64],
    ts: &mut Vec<f64>,
    ys: &mut Vec<Vec<f64>>,
) -> Result<(), IntegrateError> {
    let t0 = integrator.t();
    for &te in t_eval {
        // The solver cannot be asked for its own initial time.
        if te != t0 {
            integrator.advance(te)?;
        }
        ts.push(te);
        ys.push(integrator.state().to_vec());
    }
    Ok(())
}

fn follow_steps(
    integrator: &mut Integrator<'_>,
    tf: f64,
    ts: &mut Vec<f64>,
    ys: &mut Vec<Vec<f64>>,
) -> Result<(), IntegrateError> {
    let t0 = integrator.t();
    ts.push(t0);
    ys.push(integrator.state().to_vec());
    if tf == t0 {
        return Ok(());
    }
    let direction = (tf - t0).signum();
    loop {
        let t = integrator.step(tf)?;
        if (t - tf) * direction >= 0.0 {
            // The last step may overshoot; report the end point itself.
            let y = integrator.interpolate(tf)?;
            ts.push(tf);
            ys.push(y.as_slice().to_vec());
            return Ok(());
        }
        ts.push(t);
        ys.push(integrator.state().to_vec());
    }
}
