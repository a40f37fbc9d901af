use pyo3::prelude::*;

use crate::config::LayerNormConfig;
use crate::error::LayerNormError;
use crate::kernels::layernorm::{Dims3, LayerNorm, LayerNormCache};

impl From<LayerNormError> for PyErr {
    fn from(e: LayerNormError) -> Self {
        match e {
            LayerNormError::ShapeMismatch { .. }
            | LayerNormError::ShapeOverflow { .. }
            | LayerNormError::EmptyFeatureAxis => {
                PyErr::new::<pyo3::exceptions::PyValueError, _>(e.to_string())
            }
            _ => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(e.to_string()),
        }
    }
}

/// Opaque forward cache handed back to Python.
#[pyclass(name = "LayerNormCache")]
#[derive(Clone)]
struct PyLayerNormCache {
    inner: LayerNormCache,
}

#[pymethods]
impl PyLayerNormCache {
    #[getter]
    fn shape(&self) -> (usize, usize, usize) {
        let dims = self.inner.dims;
        (dims.batch, dims.seq_len, dims.channels)
    }

    #[getter]
    fn mean(&self) -> Vec<f32> {
        self.inner.mean.clone()
    }

    #[getter]
    fn rstd(&self) -> Vec<f32> {
        self.inner.rstd.clone()
    }
}

/// x: flattened [B, T, C], shape: (B, T, C). Returns (out, cache).
#[pyfunction]
#[pyo3(signature = (x, shape, weight, bias, eps = None))]
fn layernorm_forward(
    x: Vec<f32>,
    shape: (usize, usize, usize),
    weight: Vec<f32>,
    bias: Vec<f32>,
    eps: Option<f32>,
) -> PyResult<(Vec<f32>, PyLayerNormCache)> {
    let mut config = LayerNormConfig::default();
    if let Some(eps) = eps {
        config = config.with_eps(eps);
    }
    let dims = Dims3::new(shape.0, shape.1, shape.2);
    let (out, cache) = LayerNorm::forward(&x, &weight, &bias, dims, &config)?;
    Ok((out, PyLayerNormCache { inner: cache }))
}

/// Returns (dweight, dbias, dx).
#[pyfunction]
fn layernorm_backward(dout: Vec<f32>, cache: Option<PyLayerNormCache>) -> PyResult<(Vec<f32>, Vec<f32>, Vec<f32>)> {
    let cache = cache.ok_or(LayerNormError::MissingCache)?;
    let grads = LayerNorm::backward(&dout, &cache.inner, &LayerNormConfig::default())?;
    Ok((grads.dweight, grads.dbias, grads.dx))
}

#[pymodule]
fn layernorm_rs(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyLayerNormCache>()?;
    m.add_function(wrap_pyfunction!(layernorm_forward, m)?)?;
    m.add_function(wrap_pyfunction!(layernorm_backward, m)?)?;
    Ok(())
}
