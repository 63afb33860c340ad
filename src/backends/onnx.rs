//! ONNX Runtime segmentation backend
//!
//! Sessions are created from model files in the local [`ModelStore`],
//! downloading missing models on first use, with support for CPU, CUDA and
//! `CoreML` execution providers.

use crate::config::ExecutionProvider;
use crate::error::{BgBatchError, Result};
use crate::inference::{SegmentationSession, SessionFactory};
use crate::models::{ModelStore, PreprocessingConfig, SegmentationModel};
use crate::utils::ImagePreprocessor;
use image::{DynamicImage, GrayImage};
use ndarray::{Axis, Ix2};
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session};
use ort::value::Value;
use std::path::Path;

/// List ONNX Runtime execution providers with availability status and descriptions
#[must_use]
pub fn list_providers() -> Vec<(String, bool, String)> {
    let cuda_available =
        OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
    let coreml_available =
        OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default()).unwrap_or(false);

    vec![
        (
            "CPU".to_string(),
            true,
            "Always available, uses CPU for inference".to_string(),
        ),
        (
            "CUDA".to_string(),
            cuda_available,
            "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
        ),
        (
            "CoreML".to_string(),
            coreml_available,
            "Apple Silicon GPU acceleration (macOS only)".to_string(),
        ),
    ]
}

/// Creates [`OnnxSession`]s from the local model store
#[derive(Debug, Clone)]
pub struct OnnxSessionFactory {
    store: ModelStore,
    execution_provider: ExecutionProvider,
}

impl OnnxSessionFactory {
    #[must_use]
    pub fn new(store: ModelStore, execution_provider: ExecutionProvider) -> Self {
        Self {
            store,
            execution_provider,
        }
    }

    #[must_use]
    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    fn configure_providers(&self, session_builder: SessionBuilder) -> Result<SessionBuilder> {
        let builder = match self.execution_provider {
            ExecutionProvider::Auto => {
                // Auto-detect: try CUDA > CoreML > CPU with availability checking
                let mut providers = Vec::new();

                let cuda_provider = CUDAExecutionProvider::default();
                if OrtExecutionProvider::is_available(&cuda_provider).unwrap_or(false) {
                    log::info!("CUDA execution provider is available and will be used");
                    providers.push(cuda_provider.build());
                }

                let coreml_provider = CoreMLExecutionProvider::default();
                if OrtExecutionProvider::is_available(&coreml_provider).unwrap_or(false) {
                    log::info!("CoreML execution provider is available and will be used");
                    providers.push(coreml_provider.with_subgraphs(true).build());
                }

                if providers.is_empty() {
                    log::debug!("No hardware acceleration available, using CPU");
                    session_builder
                } else {
                    session_builder
                        .with_execution_providers(providers)
                        .map_err(|e| {
                            BgBatchError::inference(format!(
                                "Failed to set auto execution providers: {e}"
                            ))
                        })?
                }
            },
            ExecutionProvider::Cpu => {
                log::info!("Using CPU execution provider");
                session_builder
            },
            ExecutionProvider::Cuda => {
                let cuda_provider = CUDAExecutionProvider::default();
                if OrtExecutionProvider::is_available(&cuda_provider).unwrap_or(false) {
                    log::info!("Using CUDA execution provider");
                    session_builder
                        .with_execution_providers([cuda_provider.build()])
                        .map_err(|e| {
                            BgBatchError::inference(format!(
                                "Failed to set CUDA execution provider: {e}"
                            ))
                        })?
                } else {
                    log::warn!(
                        "CUDA execution provider requested but not available, falling back to CPU"
                    );
                    session_builder
                }
            },
            ExecutionProvider::CoreMl => {
                let coreml_provider = CoreMLExecutionProvider::default();
                if OrtExecutionProvider::is_available(&coreml_provider).unwrap_or(false) {
                    log::info!("Using CoreML execution provider");
                    session_builder
                        .with_execution_providers([coreml_provider.with_subgraphs(true).build()])
                        .map_err(|e| {
                            BgBatchError::inference(format!(
                                "Failed to set CoreML execution provider: {e}"
                            ))
                        })?
                } else {
                    log::warn!(
                        "CoreML execution provider requested but not available, falling back to CPU"
                    );
                    session_builder
                }
            },
        };
        Ok(builder)
    }

    fn load_session(&self, model_path: &Path) -> Result<Session> {
        let session_builder = Session::builder()
            .map_err(|e| {
                BgBatchError::inference(format!("Failed to create session builder: {e}"))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                BgBatchError::inference(format!("Failed to set optimization level: {e}"))
            })?;

        let intra_threads = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(4);

        self.configure_providers(session_builder)?
            .with_intra_threads(intra_threads)
            .map_err(|e| BgBatchError::inference(format!("Failed to set intra threads: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| {
                BgBatchError::model(format!(
                    "Failed to create session from '{}': {e}",
                    model_path.display()
                ))
            })
    }
}

impl SessionFactory for OnnxSessionFactory {
    fn create_session(&self, model: SegmentationModel) -> Result<Box<dyn SegmentationSession>> {
        let started = std::time::Instant::now();
        let model_path = self.store.ensure(model)?;
        let session = self.load_session(&model_path)?;

        log::info!(
            "Model {model} loaded in {:.0}ms ({} provider)",
            started.elapsed().as_secs_f64() * 1000.0,
            self.execution_provider
        );

        Ok(Box::new(OnnxSession {
            session,
            model,
            preprocessing: model.preprocessing(),
        }))
    }
}

/// A loaded ONNX segmentation model
pub struct OnnxSession {
    session: Session,
    model: SegmentationModel,
    preprocessing: PreprocessingConfig,
}

impl SegmentationSession for OnnxSession {
    fn model(&self) -> SegmentationModel {
        self.model
    }

    fn predict_mask(&mut self, image: &DynamicImage) -> Result<GrayImage> {
        let started = std::time::Instant::now();
        let input = ImagePreprocessor::preprocess_for_inference(image, &self.preprocessing)?;

        let input_value = Value::from_array(input).map_err(|e| {
            BgBatchError::processing(format!("Failed to convert input tensor: {e}"))
        })?;

        // Positional inputs and outputs: model files differ in tensor names
        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|e| BgBatchError::inference(format!("ONNX inference failed: {e}")))?;

        let keys: Vec<_> = outputs.keys().collect();
        let first_key = keys
            .first()
            .ok_or_else(|| BgBatchError::inference("No output tensors found"))?;
        let output = outputs
            .get(first_key)
            .ok_or_else(|| BgBatchError::inference("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| {
                BgBatchError::inference(format!("Failed to extract output tensor: {e}"))
            })?;

        if output.ndim() != 4 {
            return Err(BgBatchError::inference(format!(
                "Expected 4D output tensor, got {}D",
                output.ndim()
            )));
        }

        let plane = output
            .index_axis_move(Axis(0), 0)
            .index_axis_move(Axis(0), 0)
            .into_dimensionality::<Ix2>()
            .map_err(|e| BgBatchError::inference(format!("Unexpected output shape: {e}")))?;

        let mask = ImagePreprocessor::prediction_to_mask(plane, image.width(), image.height());

        log::debug!(
            "Inference with {} complete: {:.2}ms",
            self.model,
            started.elapsed().as_secs_f64() * 1000.0
        );
        Ok(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_provider_always_listed() {
        let providers = list_providers();
        assert_eq!(providers.len(), 3);
        assert!(providers
            .iter()
            .any(|(name, available, _)| name == "CPU" && *available));
    }
}
