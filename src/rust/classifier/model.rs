use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::{debug, info};
use ndarray::{Array2, Array4, Axis, Ix2};
use ort::session::Session;
use ort::value::{Tensor, ValueType};

use super::error::ClassifierError;
use crate::runtime::{create_session_builder, RuntimeConfig};

/// A trained network that maps one preprocessed image batch to class scores.
///
/// Implementations receive `[1, H, W, 3]` tensors and return a `[1, N]` score matrix
/// whose columns follow the class-index registry the network was trained with.
pub trait ImageModel: Send + Sync {
    fn predict(&self, input: &Array4<f32>) -> Result<Array2<f32>, ClassifierError>;

    /// `[H, W, C]` when the model declares a fixed input size.
    fn input_shape(&self) -> Option<[usize; 3]> {
        None
    }
}

/// An ONNX image classifier executed through ONNX Runtime.
#[derive(Debug)]
pub struct OnnxImageModel {
    path: PathBuf,
    session: Session,
    input_name: String,
    input_shape: Option<[usize; 3]>,
}

impl OnnxImageModel {
    /// Loads the model and validates it has an image input and at least one output.
    pub fn load<P: AsRef<Path>>(path: P, config: &RuntimeConfig) -> Result<Self, ClassifierError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ClassifierError::Model(format!("Model file not found: {}", path.display())));
        }

        let session = create_session_builder(config)?.commit_from_file(path)?;
        let (input_name, input_shape) = Self::validate_model(&session)?;
        info!("Loaded model {:?} (input '{}', shape {:?})", path, input_name, input_shape);

        Ok(Self {
            path: path.to_path_buf(),
            session,
            input_name,
            input_shape,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn validate_model(session: &Session) -> Result<(String, Option<[usize; 3]>), ClassifierError> {
        let input = session.inputs.first().ok_or_else(|| {
            ClassifierError::Model("Model must have an image input".to_string())
        })?;
        if session.outputs.is_empty() {
            return Err(ClassifierError::Model(
                "Model must have at least 1 output for class scores".to_string()
            ));
        }

        let input_shape = match &input.input_type {
            ValueType::Tensor { dimensions, .. } => match dimensions.as_slice() {
                [_, h, w, c] if *h > 0 && *w > 0 && *c > 0 => {
                    Some([*h as usize, *w as usize, *c as usize])
                }
                [_, _, _, _] => None,
                other => {
                    return Err(ClassifierError::Model(format!(
                        "Model input must be rank 4 [batch, height, width, channels], found {:?}",
                        other
                    )))
                }
            },
            other => {
                return Err(ClassifierError::Model(format!("Model input is not a tensor: {:?}", other)))
            }
        };

        Ok((input.name.clone(), input_shape))
    }
}

impl ImageModel for OnnxImageModel {
    fn predict(&self, input: &Array4<f32>) -> Result<Array2<f32>, ClassifierError> {
        let mut input_tensors = HashMap::new();
        input_tensors.insert(
            self.input_name.as_str(),
            Tensor::from_array(input.clone())
                .map_err(|e| ClassifierError::Model(format!("Failed to create input tensor: {}", e)))?,
        );

        let outputs = self.session.run(input_tensors)
            .map_err(|e| ClassifierError::Model(format!("Failed to run model: {}", e)))?;
        let output = outputs[0].try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::Model(format!("Failed to extract output tensor: {}", e)))?;
        debug!("Model output shape: {:?}", output.shape());

        let mut scores = output.to_owned();
        if scores.ndim() == 1 {
            scores = scores.insert_axis(Axis(0));
        }
        let shape = scores.shape().to_vec();
        scores
            .into_dimensionality::<Ix2>()
            .map_err(|_| ClassifierError::shape_mismatch("[1, N]", format!("{:?}", shape)))
    }

    fn input_shape(&self) -> Option<[usize; 3]> {
        self.input_shape
    }
}
