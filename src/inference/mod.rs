//! Named-tensor inference engine
//!
//! Thin abstraction over ONNX Runtime sessions. The pipeline performs all
//! pre/post-processing itself and only needs "named tensors in, tensors out";
//! keeping that behind a trait lets the vision and seq2seq stages run against
//! fake engines in tests.

use anyhow::{Context, Result};
use ndarray::{ArrayD, IxDyn};
use ort::session::{builder::GraphOptimizationLevel, Session, SessionInputValue, SessionInputs};
use ort::value::Value;
use std::borrow::Cow;
use std::path::Path;
use tracing::{debug, info};

/// A tensor with its shape, row-major. Models in this pipeline only ever
/// exchange float activations and integer token ids.
#[derive(Debug, Clone)]
pub enum TensorData {
    F32 { shape: Vec<usize>, data: Vec<f32> },
    I64 { shape: Vec<usize>, data: Vec<i64> },
}

impl TensorData {
    pub fn shape(&self) -> &[usize] {
        match self {
            TensorData::F32 { shape, .. } => shape,
            TensorData::I64 { shape, .. } => shape,
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            TensorData::F32 { data, .. } => Some(data),
            TensorData::I64 { .. } => None,
        }
    }

    /// Total element count implied by the shape.
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn from_array_f32(arr: ArrayD<f32>) -> Self {
        let shape = arr.shape().to_vec();
        let data = arr.into_raw_vec_and_offset().0;
        TensorData::F32 { shape, data }
    }

    pub fn from_array_i64(arr: ArrayD<i64>) -> Self {
        let shape = arr.shape().to_vec();
        let data = arr.into_raw_vec_and_offset().0;
        TensorData::I64 { shape, data }
    }
}

/// A model that accepts named input tensors and returns its outputs in the
/// model's declared order.
pub trait InferenceEngine: Send {
    fn run(&mut self, inputs: &[(&str, TensorData)]) -> Result<Vec<TensorData>>;

    /// Declared input names, in model order.
    fn input_names(&self) -> &[String];

    /// Static trailing dimension of the first output, when the model declares
    /// one. Classification-style models expose their class count here.
    fn output_class_count(&self) -> Option<usize> {
        None
    }
}

/// ONNX Runtime backed engine.
pub struct OnnxEngine {
    session: Session,
    input_names: Vec<String>,
    output_names: Vec<String>,
    output_class_count: Option<usize>,
}

impl OnnxEngine {
    /// Load a model from disk. Weight acquisition and caching are the host
    /// application's job; a missing file is a hard error here.
    pub fn from_file(model_path: &Path) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .with_intra_threads(4)
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .commit_from_file(model_path)
            .context("Failed to load ONNX model")?;

        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|i| i.name().to_string())
            .collect();
        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        // Dynamic dimensions come through as -1; only a fixed trailing
        // dimension counts as a declared class count.
        let output_class_count = session
            .outputs()
            .first()
            .and_then(|o| o.dtype().tensor_shape())
            .and_then(|shape| shape.iter().last().copied())
            .filter(|&d| d > 1)
            .map(|d| d as usize);

        debug!(
            "Model loaded. Inputs: {:?}, Outputs: {:?}, Classes: {:?}",
            input_names, output_names, output_class_count
        );

        Ok(Self {
            session,
            input_names,
            output_names,
            output_class_count,
        })
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }
}

impl InferenceEngine for OnnxEngine {
    fn run(&mut self, inputs: &[(&str, TensorData)]) -> Result<Vec<TensorData>> {
        let mut session_inputs: Vec<(Cow<'_, str>, SessionInputValue<'_>)> =
            Vec::with_capacity(inputs.len());
        for (name, tensor) in inputs {
            let value = match tensor {
                TensorData::F32 { shape, data } => {
                    let arr = ArrayD::from_shape_vec(IxDyn(shape), data.clone())
                        .context("Input tensor shape/data mismatch")?;
                    Value::from_array(arr)
                        .context("Failed to create input tensor")?
                        .into_dyn()
                }
                TensorData::I64 { shape, data } => {
                    let arr = ArrayD::from_shape_vec(IxDyn(shape), data.clone())
                        .context("Input tensor shape/data mismatch")?;
                    Value::from_array(arr)
                        .context("Failed to create input tensor")?
                        .into_dyn()
                }
            };
            session_inputs.push((Cow::Borrowed(*name), value.into()));
        }

        let outputs = self
            .session
            .run(SessionInputs::<0>::ValueMap(session_inputs))
            .context("Inference failed")?;

        let mut result = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let value = &outputs[name.as_str()];
            if let Ok(arr) = value.try_extract_array::<f32>() {
                result.push(TensorData::F32 {
                    shape: arr.shape().to_vec(),
                    data: arr.iter().copied().collect(),
                });
            } else {
                let arr = value
                    .try_extract_array::<i64>()
                    .context("Output tensor is neither f32 nor i64")?;
                result.push(TensorData::I64 {
                    shape: arr.shape().to_vec(),
                    data: arr.iter().copied().collect(),
                });
            }
        }
        Ok(result)
    }

    fn input_names(&self) -> &[String] {
        &self.input_names
    }

    fn output_class_count(&self) -> Option<usize> {
        self.output_class_count
    }
}
