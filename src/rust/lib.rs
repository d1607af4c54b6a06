//! Runtime side of an arthritis image classifier: the class-index registry written at
//! training time, image preprocessing, prediction decoding and deployment export.
//!
//! # Basic Usage
//!
//! ```rust
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use arthrolens::{decode, ClassIndexRegistry};
//!
//! let registry = ClassIndexRegistry::build(["a", "b", "c"])?;
//! let prediction = decode(&[0.1, 0.7, 0.2], &registry)?;
//! assert_eq!(prediction.class_name, "b");
//! assert_eq!(prediction.confidence, 0.7);
//! # Ok(())
//! # }
//! ```
//!
//! # Export
//!
//! Deployment metadata is always derived from the persisted registry, so a consumer
//! that identifies classes by list position sees the same order the decoder uses:
//!
//! ```rust
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use arthrolens::{export_metadata, ClassIndexRegistry};
//!
//! let registry = ClassIndexRegistry::load(r#"{"osteoarthritis": 1, "normal": 0}"#.as_bytes())?;
//! let metadata = export_metadata(&registry, [224, 224, 3]);
//! assert_eq!(metadata.class_labels, ["normal", "osteoarthritis"]);
//! # Ok(())
//! # }
//! ```

pub mod chat;
pub mod classifier;
pub mod evaluation;
pub mod export;
pub mod report;
mod runtime;
pub mod store;

pub use classifier::{
    decode, ClassIndexRegistry, ClassScore, Classifier, ClassifierBuilder, ClassifierError, ClassifierInfo,
    DecodedPrediction, ImageModel, OnnxImageModel, Preprocessor, Severity, TargetSize,
};
pub use export::{export_binary_model, export_metadata, ExportedMetadata, Exporter, ModelCompiler, OnnxModelCompiler};
pub use runtime::{create_session_builder, OptimizationLevel, RuntimeConfig};
pub use store::{ArtifactStore, StoreError};

pub fn init_logger() {
    env_logger::init();
}
