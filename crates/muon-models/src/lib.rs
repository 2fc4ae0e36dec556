//! TFLite model inspection for the Muon NPU driver.
//!
//! Buffer-backed networks carry their model as an opaque blob; the only
//! host-side question is how large the input and output feature maps are.
//! [`model_dims`] answers it by walking the model's FlatBuffers tables
//! directly: inputs of the first subgraph, outputs of the last, each tensor
//! sized as shape product times element size.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

mod error;
pub mod test_model;
mod tflite;

pub use error::{ModelError, Result};
pub use tflite::{model_dims, ModelDims, FILE_IDENTIFIER};
