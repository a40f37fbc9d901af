pub mod backend;
pub mod config;
pub mod error;
pub mod kernels;
pub mod models;
pub mod utils;
#[cfg(feature = "python")]
pub mod python;

pub use backend::{Backend, DEFAULT_BACKEND};
pub use config::LayerNormConfig;
pub use error::{LayerNormError, Result};
pub use kernels::layernorm::{Dims3, LayerNorm, LayerNormCache, LayerNormGrads};
pub use models::LayerNormLayer;
