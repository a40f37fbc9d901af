// CPU reference kernels. Each kernel takes flattened f32 buffers plus explicit dims.

pub mod layernorm;

pub use layernorm::{layernorm_backward, layernorm_forward};
