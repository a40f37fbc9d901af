// LayerNorm kernel implementation
// Forward returns an explicit cache that backward consumes.

use rayon::prelude::*;

use crate::config::LayerNormConfig;
use crate::error::{check_len, LayerNormError, Result};

/// Logical shape of a (batch, seq_len, channels) activation buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dims3 {
    pub batch: usize,
    pub seq_len: usize,
    pub channels: usize,
}

impl Dims3 {
    pub fn new(batch: usize, seq_len: usize, channels: usize) -> Self {
        Self { batch, seq_len, channels }
    }

    /// Number of (batch, time) positions, i.e. rows of length `channels`.
    /// Saturates on overflow; kernels go through [`Dims3::checked_numel`].
    pub fn positions(&self) -> usize {
        self.batch.saturating_mul(self.seq_len)
    }

    pub fn numel(&self) -> usize {
        self.positions().saturating_mul(self.channels)
    }

    /// `batch * seq_len * channels`, or `ShapeOverflow` if it does not fit in `usize`.
    pub fn checked_numel(&self) -> Result<usize> {
        self.batch
            .checked_mul(self.seq_len)
            .and_then(|p| p.checked_mul(self.channels))
            .ok_or(LayerNormError::ShapeOverflow {
                batch: self.batch,
                seq_len: self.seq_len,
                channels: self.channels,
            })
    }
}

/// Values saved by [`LayerNorm::forward`] for [`LayerNorm::backward`].
///
/// `mean` and `rstd` hold one entry per position (shape `[B, T, 1]`).
#[derive(Debug, Clone, PartialEq)]
pub struct LayerNormCache {
    pub x: Vec<f32>,
    pub weight: Vec<f32>,
    pub mean: Vec<f32>,
    pub rstd: Vec<f32>,
    pub dims: Dims3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerNormGrads {
    pub dweight: Vec<f32>,
    pub dbias: Vec<f32>,
    pub dx: Vec<f32>,
}

pub struct LayerNorm;

impl LayerNorm {
    /// CPU reference forward pass.
    ///
    /// x: [batch, seq_len, channels] flattened
    /// weight, bias: [channels]
    ///
    /// out = (x - mean) * rstd * weight + bias, with the population variance
    /// taken over the channel axis.
    pub fn forward(
        x: &[f32],
        weight: &[f32],
        bias: &[f32],
        dims: Dims3,
        config: &LayerNormConfig,
    ) -> Result<(Vec<f32>, LayerNormCache)> {
        config.validate()?;
        if dims.channels == 0 {
            return Err(LayerNormError::EmptyFeatureAxis);
        }
        let numel = dims.checked_numel()?;
        check_len("x", numel, x.len())?;
        check_len("weight", dims.channels, weight.len())?;
        check_len("bias", dims.channels, bias.len())?;

        let c = dims.channels;
        let eps = config.eps;
        let parallel = config.use_parallel(dims.positions());
        log::debug!(
            "layernorm forward: B={} T={} C={} parallel={}",
            dims.batch,
            dims.seq_len,
            c,
            parallel
        );

        let mut out = vec![0.0f32; numel];
        let (mean, rstd): (Vec<f32>, Vec<f32>) = if parallel {
            out.par_chunks_mut(c)
                .zip(x.par_chunks(c))
                .map(|(out_row, x_row)| forward_row(x_row, weight, bias, eps, out_row))
                .unzip()
        } else {
            out.chunks_mut(c)
                .zip(x.chunks(c))
                .map(|(out_row, x_row)| forward_row(x_row, weight, bias, eps, out_row))
                .unzip()
        };

        if config.check_finite {
            ensure_finite("forward output", &out)?;
        }

        let cache = LayerNormCache {
            x: x.to_vec(),
            weight: weight.to_vec(),
            mean,
            rstd,
            dims,
        };
        Ok((out, cache))
    }

    /// CPU reference backward pass.
    ///
    /// dout: [batch, seq_len, channels] flattened, gradient of the loss with
    /// respect to the forward output. The normalized input is recomputed from
    /// the cache rather than stored.
    pub fn backward(dout: &[f32], cache: &LayerNormCache, config: &LayerNormConfig) -> Result<LayerNormGrads> {
        let dims = cache.dims;
        let c = dims.channels;
        if c == 0 {
            return Err(LayerNormError::EmptyFeatureAxis);
        }
        let numel = dims.checked_numel()?;
        check_len("dout", numel, dout.len())?;
        check_len("cache.x", numel, cache.x.len())?;
        check_len("cache.weight", c, cache.weight.len())?;
        check_len("cache.mean", dims.positions(), cache.mean.len())?;
        check_len("cache.rstd", dims.positions(), cache.rstd.len())?;

        let parallel = config.use_parallel(dims.positions());
        log::debug!(
            "layernorm backward: B={} T={} C={} parallel={}",
            dims.batch,
            dims.seq_len,
            c,
            parallel
        );

        let weight = cache.weight.as_slice();
        let mut dx = vec![0.0f32; numel];

        let (dweight, dbias) = if parallel {
            dx.par_chunks_mut(c)
                .zip(dout.par_chunks(c))
                .zip(cache.x.par_chunks(c))
                .zip(cache.mean.par_iter().zip(cache.rstd.par_iter()))
                .fold(
                    || (vec![0.0f32; c], vec![0.0f32; c]),
                    |(mut dw, mut db), (((dx_row, dout_row), x_row), (&mean, &rstd))| {
                        backward_row(dout_row, x_row, weight, mean, rstd, dx_row, &mut dw, &mut db);
                        (dw, db)
                    },
                )
                .reduce(
                    || (vec![0.0f32; c], vec![0.0f32; c]),
                    |(mut dw, mut db), (dw_part, db_part)| {
                        add_assign(&mut dw, &dw_part);
                        add_assign(&mut db, &db_part);
                        (dw, db)
                    },
                )
        } else {
            let mut dw = vec![0.0f32; c];
            let mut db = vec![0.0f32; c];
            for (((dx_row, dout_row), x_row), (&mean, &rstd)) in dx
                .chunks_mut(c)
                .zip(dout.chunks(c))
                .zip(cache.x.chunks(c))
                .zip(cache.mean.iter().zip(cache.rstd.iter()))
            {
                backward_row(dout_row, x_row, weight, mean, rstd, dx_row, &mut dw, &mut db);
            }
            (dw, db)
        };

        if config.check_finite {
            ensure_finite("dx", &dx)?;
            ensure_finite("dweight", &dweight)?;
            ensure_finite("dbias", &dbias)?;
        }

        Ok(LayerNormGrads { dweight, dbias, dx })
    }
}

/// Normalizes one row into `out_row` and returns its `(mean, rstd)`.
fn forward_row(x_row: &[f32], weight: &[f32], bias: &[f32], eps: f32, out_row: &mut [f32]) -> (f32, f32) {
    let n = x_row.len() as f32;
    let mean = x_row.iter().sum::<f32>() / n;
    let variance = x_row.iter().map(|&v| (v - mean) * (v - mean)).sum::<f32>() / n;
    let rstd = 1.0 / (variance + eps).sqrt();

    for j in 0..x_row.len() {
        let normed = (x_row[j] - mean) * rstd;
        out_row[j] = normed * weight[j] + bias[j];
    }
    (mean, rstd)
}

#[allow(clippy::too_many_arguments)]
fn backward_row(
    dout_row: &[f32],
    x_row: &[f32],
    weight: &[f32],
    mean: f32,
    rstd: f32,
    dx_row: &mut [f32],
    dweight: &mut [f32],
    dbias: &mut [f32],
) {
    let n = x_row.len() as f32;

    // Two reductions over the channel axis first.
    let mut dnorm_mean = 0.0f32;
    let mut dnorm_norm_mean = 0.0f32;
    for j in 0..x_row.len() {
        let normed = (x_row[j] - mean) * rstd;
        let dnorm = weight[j] * dout_row[j];
        dnorm_mean += dnorm;
        dnorm_norm_mean += dnorm * normed;
    }
    dnorm_mean /= n;
    dnorm_norm_mean /= n;

    for j in 0..x_row.len() {
        let normed = (x_row[j] - mean) * rstd;
        let dnorm = weight[j] * dout_row[j];
        dbias[j] += dout_row[j];
        dweight[j] += dout_row[j] * normed;
        dx_row[j] = (dnorm - dnorm_mean - normed * dnorm_norm_mean) * rstd;
    }
}

fn add_assign(acc: &mut [f32], other: &[f32]) {
    for (a, b) in acc.iter_mut().zip(other) {
        *a += b;
    }
}

fn ensure_finite(stage: &'static str, values: &[f32]) -> Result<()> {
    if let Some(index) = values.iter().position(|v| !v.is_finite()) {
        log::warn!("layernorm: non-finite value in {} at index {}", stage, index);
        return Err(LayerNormError::NumericOverflow { stage, index });
    }
    Ok(())
}

pub fn layernorm_forward(
    x: &[f32],
    weight: &[f32],
    bias: &[f32],
    dims: Dims3,
) -> Result<(Vec<f32>, LayerNormCache)> {
    LayerNorm::forward(x, weight, bias, dims, &LayerNormConfig::default())
}

pub fn layernorm_backward(dout: &[f32], cache: &LayerNormCache) -> Result<LayerNormGrads> {
    LayerNorm::backward(dout, cache, &LayerNormConfig::default())
}
