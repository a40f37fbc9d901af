pub mod layer_norm;

pub use layer_norm::LayerNormLayer;
