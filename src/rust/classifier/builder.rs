use std::path::Path;

use log::info;

use super::classifier::Classifier;
use super::error::ClassifierError;
use super::model::{ImageModel, OnnxImageModel};
use super::preprocess::{Preprocessor, TargetSize};
use super::registry::ClassIndexRegistry;
use crate::runtime::RuntimeConfig;

/// A builder for constructing a Classifier with a fluent interface.
#[derive(Default)]
pub struct ClassifierBuilder {
    model: Option<Box<dyn ImageModel>>,
    registry: Option<ClassIndexRegistry>,
    target_size: Option<TargetSize>,
    runtime_config: RuntimeConfig,
}

impl ClassifierBuilder {
    /// Creates a new empty ClassifierBuilder instance with default configuration
    ///
    /// # Example
    /// ```
    /// use arthrolens::ClassifierBuilder;
    ///
    /// let builder = ClassifierBuilder::new();
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the runtime configuration used by [`with_onnx_model`](Self::with_onnx_model).
    /// Must be called before the model is loaded to take effect.
    pub fn with_runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.runtime_config = config;
        self
    }

    /// Uses an already constructed model.
    pub fn with_model(mut self, model: impl ImageModel + 'static) -> Self {
        self.model = Some(Box::new(model));
        self
    }

    /// Loads an ONNX model from disk.
    ///
    /// # Returns
    /// * `Result<Self, ClassifierError>` - The builder instance if successful, or an error if:
    ///   - A model is already set
    ///   - The file doesn't exist
    ///   - The model failed to load or is not an image classifier
    pub fn with_onnx_model<P: AsRef<Path>>(mut self, model_path: P) -> Result<Self, ClassifierError> {
        if self.model.is_some() {
            return Err(ClassifierError::InvalidInput("Model already set".to_string()));
        }
        let model = OnnxImageModel::load(model_path, &self.runtime_config)?;
        info!("Model structure validated successfully");
        self.model = Some(Box::new(model));
        Ok(self)
    }

    pub fn with_registry(mut self, registry: ClassIndexRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Loads the registry persisted next to the trained model.
    pub fn with_registry_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ClassifierError> {
        let registry = ClassIndexRegistry::load_file(path)?;
        Ok(self.with_registry(registry))
    }

    /// Overrides the input size. Defaults to the model's declared size, or 224x224.
    pub fn with_target_size(mut self, target_size: TargetSize) -> Self {
        self.target_size = Some(target_size);
        self
    }

    /// Builds and returns the final Classifier instance
    ///
    /// # Returns
    /// * `Result<Classifier, ClassifierError>` - The constructed Classifier if successful, or an error if:
    ///   - No model or registry is set
    ///   - The explicit target size disagrees with the size the model declares
    ///   - The model declares a non-RGB input
    pub fn build(self) -> Result<Classifier, ClassifierError> {
        let model = self.model
            .ok_or_else(|| ClassifierError::InvalidInput("A model must be set".to_string()))?;
        let registry = self.registry
            .ok_or_else(|| ClassifierError::InvalidInput("A class index registry must be set".to_string()))?;

        let target_size = TargetSize::resolve(self.target_size, model.input_shape())?;

        info!(
            "Classifier ready: {} classes, input {}x{}",
            registry.len(), target_size.height, target_size.width
        );

        Ok(Classifier {
            model,
            registry,
            preprocessor: Preprocessor::new(target_size),
        })
    }
}
