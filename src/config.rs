use crate::backend::{Backend, DEFAULT_BACKEND};
use crate::error::{LayerNormError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Epsilon added to the variance before the reciprocal square root.
pub const DEFAULT_EPS: f32 = 1e-5;

/// Positions below which the parallel backend falls back to a plain loop.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerNormConfig {
    #[serde(default = "default_eps")]
    pub eps: f32,
    #[serde(default = "default_backend")]
    pub backend: Backend,
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,
    #[serde(default = "default_check_finite")]
    pub check_finite: bool,
}

fn default_eps() -> f32 {
    DEFAULT_EPS
}

fn default_backend() -> Backend {
    *DEFAULT_BACKEND
}

fn default_parallel_threshold() -> usize {
    DEFAULT_PARALLEL_THRESHOLD
}

fn default_check_finite() -> bool {
    true
}

impl Default for LayerNormConfig {
    fn default() -> Self {
        Self {
            eps: default_eps(),
            backend: default_backend(),
            parallel_threshold: default_parallel_threshold(),
            check_finite: default_check_finite(),
        }
    }
}

impl LayerNormConfig {
    /// Single-threaded config with the default epsilon.
    pub fn sequential() -> Self {
        Self { backend: Backend::Sequential, ..Self::default() }
    }

    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.eps.is_finite() || self.eps <= 0.0 {
            return Err(LayerNormError::InvalidConfig(format!(
                "eps must be finite and positive, got {}",
                self.eps
            )));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: LayerNormConfig = serde_json::from_str(json)
            .map_err(|e| LayerNormError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config_str = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&config_str)
    }

    /// Whether a run over `positions` rows should use rayon.
    pub(crate) fn use_parallel(&self, positions: usize) -> bool {
        self.backend == Backend::Parallel && positions >= self.parallel_threshold
    }
}
