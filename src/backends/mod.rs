//! Segmentation backend implementations
//!
//! - ONNX Runtime backend (GPU acceleration where available)

#[cfg(feature = "onnx")]
pub mod onnx;

// Test utilities for pipeline testing
#[cfg(test)]
pub mod test_utils;

#[cfg(feature = "onnx")]
pub use self::onnx::{list_providers, OnnxSession, OnnxSessionFactory};
