use candle_core::{DType, Device, Tensor, D};
use candle_nn::{Module, VarBuilder};

use crate::config::LayerNormConfig;
use crate::error::{LayerNormError, Result};
use crate::kernels::layernorm::{Dims3, LayerNorm, LayerNormCache};

/// Layer norm over the last dimension of a candle tensor.
///
/// `Module::forward` is written in candle ops so candle's autograd can
/// differentiate it. `forward_with_cache` / `backward` run the slice kernel
/// instead and pass the cache explicitly.
#[derive(Clone, Debug)]
pub struct LayerNormLayer {
    pub weight: Tensor,
    pub bias: Tensor,
    pub config: LayerNormConfig,
}

impl LayerNormLayer {
    pub fn new(weight: Tensor, bias: Tensor, config: LayerNormConfig) -> Result<Self> {
        config.validate()?;
        let hidden_size = weight.dims1()?;
        let bias_size = bias.dims1()?;
        if hidden_size != bias_size {
            return Err(LayerNormError::ShapeMismatch {
                tensor: "bias",
                expected: hidden_size,
                actual: bias_size,
            });
        }
        if hidden_size == 0 {
            return Err(LayerNormError::EmptyFeatureAxis);
        }
        Ok(Self { weight, bias, config })
    }

    /// Loads `weight` and `bias` of shape `[hidden_size]` from `vb`.
    pub fn load(vb: VarBuilder, hidden_size: usize, config: LayerNormConfig) -> Result<Self> {
        let weight = vb.get(hidden_size, "weight")?;
        let bias = vb.get(hidden_size, "bias")?;
        Self::new(weight, bias, config)
    }

    /// Identity-initialized layer: weight = 1, bias = 0.
    pub fn ones(hidden_size: usize, config: LayerNormConfig, device: &Device) -> Result<Self> {
        let weight = Tensor::ones(hidden_size, DType::F32, device)?;
        let bias = Tensor::zeros(hidden_size, DType::F32, device)?;
        Self::new(weight, bias, config)
    }

    pub fn hidden_size(&self) -> usize {
        self.weight.dims()[0]
    }

    /// Runs the slice kernel on `x` of shape `[B, T, C]` (or `[N, C]`, read
    /// as B = 1, T = N). The output keeps the shape of `x`.
    pub fn forward_with_cache(&self, x: &Tensor) -> Result<(Tensor, LayerNormCache)> {
        let dims = self.dims_of(x)?;
        let x_data = x.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        let weight = self.weight.to_dtype(DType::F32)?.to_vec1::<f32>()?;
        let bias = self.bias.to_dtype(DType::F32)?.to_vec1::<f32>()?;

        let (out, cache) = LayerNorm::forward(&x_data, &weight, &bias, dims, &self.config)?;
        let out = Tensor::from_vec(out, x.dims(), x.device())?.to_dtype(x.dtype())?;
        Ok((out, cache))
    }

    /// Returns `(dweight, dbias, dx)` for `dout` shaped like the forward input.
    pub fn backward(&self, dout: &Tensor, cache: &LayerNormCache) -> Result<(Tensor, Tensor, Tensor)> {
        let dims = self.dims_of(dout)?;
        if dims != cache.dims {
            return Err(LayerNormError::ShapeMismatch {
                tensor: "dout",
                expected: cache.dims.numel(),
                actual: dims.numel(),
            });
        }
        let dout_data = dout.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        let grads = LayerNorm::backward(&dout_data, cache, &self.config)?;

        let device = dout.device();
        let dweight = Tensor::from_vec(grads.dweight, dims.channels, device)?;
        let dbias = Tensor::from_vec(grads.dbias, dims.channels, device)?;
        let dx = Tensor::from_vec(grads.dx, dout.dims(), device)?.to_dtype(dout.dtype())?;
        Ok((dweight, dbias, dx))
    }

    fn dims_of(&self, x: &Tensor) -> Result<Dims3> {
        let dims = match x.dims() {
            &[b, t, c] => Dims3::new(b, t, c),
            &[n, c] => Dims3::new(1, n, c),
            other => {
                return Err(LayerNormError::Candle(candle_core::Error::Msg(format!(
                    "layer norm expects a rank 2 or 3 tensor, got shape {:?}",
                    other
                ))))
            }
        };
        if dims.channels != self.hidden_size() {
            return Err(LayerNormError::ShapeMismatch {
                tensor: "x",
                expected: self.hidden_size(),
                actual: dims.channels,
            });
        }
        Ok(dims)
    }
}

impl Module for LayerNormLayer {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        // Always upcast for the statistics.
        let x_dtype = xs.dtype();
        let hidden_size = xs.dim(D::Minus1)?;
        let x = xs.to_dtype(DType::F32)?;

        let mean = (x.sum_keepdim(D::Minus1)? / hidden_size as f64)?;
        let centered = x.broadcast_sub(&mean)?;
        let var = (centered.sqr()?.sum_keepdim(D::Minus1)? / hidden_size as f64)?;
        let rstd = (var + self.config.eps as f64)?.sqrt()?.recip()?;

        let normed = centered.broadcast_mul(&rstd)?;
        let weight = self.weight.to_dtype(DType::F32)?;
        let bias = self.bias.to_dtype(DType::F32)?;
        let out = normed.broadcast_mul(&weight)?.broadcast_add(&bias)?;
        out.to_dtype(x_dtype)
    }
}
