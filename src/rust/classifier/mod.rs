mod builder;
#[allow(clippy::module_inception)]
mod classifier;
pub mod decoder;
mod error;
pub mod model;
pub mod preprocess;
pub mod registry;

pub use builder::ClassifierBuilder;
pub use classifier::Classifier;
pub use decoder::{decode, decode_batch_output, ClassScore, DecodedPrediction, Severity};
pub use error::ClassifierError;
pub use model::{ImageModel, OnnxImageModel};
pub use preprocess::{Preprocessor, TargetSize};
pub use registry::ClassIndexRegistry;

/// Information about a classifier's configuration
#[derive(Debug, Clone)]
pub struct ClassifierInfo {
    pub num_classes: usize,
    /// Labels in registry order
    pub class_labels: Vec<String>,
    /// `[H, W, C]` fed to the model
    pub input_shape: [usize; 3],
}
