use std::path::Path;

use log::info;

use super::decoder::{decode_batch_output, DecodedPrediction};
use super::error::ClassifierError;
use super::model::ImageModel;
use super::preprocess::{decode_image, Preprocessor};
use super::registry::ClassIndexRegistry;

/// An image classifier pairing a trained model with the registry it was trained against.
///
/// The registry and preprocessor are owned by the classifier; nothing is shared through
/// process-wide state. Wrap the classifier in an `Arc` to share it between threads.
///
/// ```no_run
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use arthrolens::Classifier;
///
/// let classifier = Classifier::builder()
///     .with_onnx_model("models/model.onnx")?
///     .with_registry_file("models/class_indices.json")?
///     .build()?;
///
/// let prediction = classifier.classify_path("knee.png")?;
/// println!("{} ({:.2}%)", prediction.class_name, prediction.confidence * 100.0);
/// # Ok(())
/// # }
/// ```
pub struct Classifier {
    pub(super) model: Box<dyn ImageModel>,
    pub(super) registry: ClassIndexRegistry,
    pub(super) preprocessor: Preprocessor,
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("registry", &self.registry)
            .field("preprocessor", &self.preprocessor)
            .finish_non_exhaustive()
    }
}

impl Classifier {
    /// Creates a new ClassifierBuilder for fluent construction
    pub fn builder() -> super::builder::ClassifierBuilder {
        super::builder::ClassifierBuilder::new()
    }

    /// Returns information about the classifier's current state
    pub fn info(&self) -> super::ClassifierInfo {
        super::ClassifierInfo {
            num_classes: self.registry.len(),
            class_labels: self.registry.ordered_names().to_vec(),
            input_shape: self.preprocessor.target_size().input_shape(),
        }
    }

    pub fn registry(&self) -> &ClassIndexRegistry {
        &self.registry
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    pub fn model(&self) -> &dyn ImageModel {
        self.model.as_ref()
    }

    /// Classifies an encoded image.
    pub fn classify_bytes(&self, raw_image: &[u8]) -> Result<DecodedPrediction, ClassifierError> {
        let image = decode_image(raw_image)?;
        let tensor = self.preprocessor.prepare_image(&image);
        let output = self.model.predict(&tensor)?;
        decode_batch_output(&output, &self.registry)
    }

    pub fn classify_path<P: AsRef<Path>>(&self, path: P) -> Result<DecodedPrediction, ClassifierError> {
        let path = path.as_ref();
        let tensor = self.preprocessor.prepare_path(path)?;
        let output = self.model.predict(&tensor)?;
        let prediction = decode_batch_output(&output, &self.registry)?;
        info!(
            "Classified {:?} as '{}' ({:.4})",
            path, prediction.class_name, prediction.confidence
        );
        Ok(prediction)
    }
}

// Compile-time verification of thread-safety
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn verify_thread_safety() {
        assert_send_sync::<Classifier>();
    }
};
