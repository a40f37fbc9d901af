pub mod gradcheck;

pub use gradcheck::{check_gradients, GradCheckReport};
