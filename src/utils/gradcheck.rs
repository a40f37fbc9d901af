//! Finite-difference check of the analytic layer norm gradients.
//!
//! The scalar loss is `sum(out * dout)`, so its gradient with respect to the
//! output is exactly `dout` and the analytic gradients come straight from
//! [`LayerNorm::backward`]. The numeric side evaluates the loss with an f64
//! forward pass, so the only error left in it is the truncation of the
//! central difference.

use crate::config::LayerNormConfig;
use crate::error::Result;
use crate::kernels::layernorm::{Dims3, LayerNorm, LayerNormGrads};

/// Largest deviation between analytic and numeric gradients, per parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct GradCheckReport {
    pub max_err_dx: f64,
    pub max_err_dweight: f64,
    pub max_err_dbias: f64,
    /// Analytic gradients the numeric ones were compared against.
    pub analytic: LayerNormGrads,
}

impl GradCheckReport {
    pub fn max_error(&self) -> f64 {
        self.max_err_dx.max(self.max_err_dweight).max(self.max_err_dbias)
    }

    pub fn passes(&self, tolerance: f64) -> bool {
        self.max_error() <= tolerance
    }
}

#[derive(Debug, Clone, Copy)]
enum Param {
    X,
    Weight,
    Bias,
}

/// Compares analytic gradients against central differences with step `step`.
///
/// Errors are scaled by `max(1, |analytic|)`, so `max_err_*` is absolute for
/// small gradients and relative for large ones.
pub fn check_gradients(
    x: &[f32],
    weight: &[f32],
    bias: &[f32],
    dout: &[f32],
    dims: Dims3,
    config: &LayerNormConfig,
    step: f64,
) -> Result<GradCheckReport> {
    let (_, cache) = LayerNorm::forward(x, weight, bias, dims, config)?;
    let analytic = LayerNorm::backward(dout, &cache, config)?;

    let widen = |v: &[f32]| v.iter().map(|&e| e as f64).collect::<Vec<f64>>();
    let mut inputs = [widen(x), widen(weight), widen(bias)];
    let dout = widen(dout);
    let eps = config.eps as f64;

    let max_err_dx = max_error(&mut inputs, Param::X, &analytic.dx, &dout, dims, eps, step);
    let max_err_dweight = max_error(&mut inputs, Param::Weight, &analytic.dweight, &dout, dims, eps, step);
    let max_err_dbias = max_error(&mut inputs, Param::Bias, &analytic.dbias, &dout, dims, eps, step);

    log::debug!(
        "gradcheck: dx={:.3e} dweight={:.3e} dbias={:.3e}",
        max_err_dx,
        max_err_dweight,
        max_err_dbias
    );

    Ok(GradCheckReport {
        max_err_dx,
        max_err_dweight,
        max_err_dbias,
        analytic,
    })
}

fn max_error(
    inputs: &mut [Vec<f64>; 3],
    param: Param,
    analytic: &[f32],
    dout: &[f64],
    dims: Dims3,
    eps: f64,
    step: f64,
) -> f64 {
    let slot = param as usize;
    let mut worst = 0.0f64;

    for i in 0..inputs[slot].len() {
        let original = inputs[slot][i];

        inputs[slot][i] = original + step;
        let plus = loss(inputs, dout, dims, eps);
        inputs[slot][i] = original - step;
        let minus = loss(inputs, dout, dims, eps);
        inputs[slot][i] = original;

        let numeric = (plus - minus) / (2.0 * step);
        let exact = analytic[i] as f64;
        let err = (numeric - exact).abs() / exact.abs().max(1.0);
        worst = worst.max(err);
    }
    worst
}

/// `sum(out * dout)` with the forward pass evaluated in f64.
fn loss(inputs: &[Vec<f64>; 3], dout: &[f64], dims: Dims3, eps: f64) -> f64 {
    let [x, weight, bias] = inputs;
    let c = dims.channels;
    let mut total = 0.0f64;

    for (x_row, dout_row) in x.chunks(c).zip(dout.chunks(c)) {
        let n = c as f64;
        let mean = x_row.iter().sum::<f64>() / n;
        let variance = x_row.iter().map(|&v| (v - mean) * (v - mean)).sum::<f64>() / n;
        let rstd = 1.0 / (variance + eps).sqrt();
        for j in 0..c {
            let out = (x_row[j] - mean) * rstd * weight[j] + bias[j];
            total += out * dout_row[j];
        }
    }
    total
}
