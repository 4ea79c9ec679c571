pub mod types;
pub mod error;
pub mod weights;

pub use error::{Error, Result};
pub use types::{Millis, elapsed_ms};
pub use weights::BlendshapeWeights;
