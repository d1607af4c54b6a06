//! Deployment artifacts for runtimes other than the one that trained the model.
//!
//! A consuming runtime re-derives class identity purely from list position, so every
//! label list written here comes from [`ClassIndexRegistry::ordered_names`] and never from
//! a fresh scan of the training data.

use std::fs;
use std::io::{BufReader, Write};
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::classifier::{ClassIndexRegistry, ClassifierError};
use crate::runtime::{create_session_builder, OptimizationLevel, RuntimeConfig};
use crate::store::{sha256_hex, METADATA_FILE};

pub const LABELS_FILE: &str = "labels.txt";
pub const BINARY_MODEL_FILE: &str = "model.opt.onnx";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Metadata consumed by the deployment runtime alongside the binary model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedMetadata {
    /// `[H, W, C]`
    pub input_size: [usize; 3],
    /// Label `i` is the class at registry index `i`.
    pub class_labels: Vec<String>,
}

impl ExportedMetadata {
    /// Reads a previously written `model_metadata.json`.
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, ClassifierError> {
        let file = fs::File::open(path.as_ref())?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            ClassifierError::CorruptData(format!("Unreadable metadata {:?}: {}", path.as_ref(), e))
        })
    }

    /// Checks the metadata still agrees with `registry`, position by position.
    pub fn verify_against(&self, registry: &ClassIndexRegistry) -> Result<(), ClassifierError> {
        if self.class_labels.len() != registry.len() {
            return Err(ClassifierError::shape_mismatch(
                format!("{} labels", registry.len()),
                format!("{} labels", self.class_labels.len()),
            ));
        }
        for (index, label) in self.class_labels.iter().enumerate() {
            let expected = registry.name_at(index)?;
            if label != expected {
                return Err(ClassifierError::Export(format!(
                    "Label {} is '{}' but the registry has '{}'",
                    index, label, expected
                )));
            }
        }
        Ok(())
    }
}

pub fn export_metadata(registry: &ClassIndexRegistry, input_shape: [usize; 3]) -> ExportedMetadata {
    ExportedMetadata {
        input_size: input_shape,
        class_labels: registry.ordered_names().to_vec(),
    }
}

/// Compiles a trained model into a binary artifact for a constrained runtime.
pub trait ModelCompiler {
    fn compile(&self, model_path: &Path) -> Result<Vec<u8>, ClassifierError>;
}

/// Runs the ONNX Runtime graph optimiser over a model and returns the optimised graph.
#[derive(Debug, Clone)]
pub struct OnnxModelCompiler {
    config: RuntimeConfig,
}

impl OnnxModelCompiler {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }
}

impl Default for OnnxModelCompiler {
    fn default() -> Self {
        Self::new(RuntimeConfig {
            optimization_level: OptimizationLevel::All,
            ..RuntimeConfig::default()
        })
    }
}

impl ModelCompiler for OnnxModelCompiler {
    fn compile(&self, model_path: &Path) -> Result<Vec<u8>, ClassifierError> {
        if !model_path.exists() {
            return Err(ClassifierError::Export(format!("Model file not found: {}", model_path.display())));
        }

        let scratch = tempfile::Builder::new()
            .prefix("arthrolens-")
            .suffix(".onnx")
            .tempfile()?;
        let scratch_path = scratch.path().to_string_lossy().to_string();

        let export_err = |e: ort::Error| ClassifierError::Export(format!("Failed to compile model: {}", e));
        let _session = create_session_builder(&self.config)
            .map_err(export_err)?
            .with_optimized_model_path(&scratch_path)
            .map_err(export_err)?
            .commit_from_file(model_path)
            .map_err(export_err)?;

        let bytes = fs::read(scratch.path())?;
        if bytes.is_empty() {
            return Err(ClassifierError::Export("Optimised model is empty".to_string()));
        }
        info!("Compiled {:?} into {} bytes", model_path, bytes.len());
        Ok(bytes)
    }
}

pub fn export_binary_model(compiler: &dyn ModelCompiler, model_path: &Path) -> Result<Vec<u8>, ClassifierError> {
    compiler.compile(model_path)
}

/// One file written by the exporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub file: String,
    pub bytes: u64,
    pub sha256: String,
}

/// Index of everything written in one export run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub num_classes: usize,
    pub artifacts: Vec<ArtifactEntry>,
}

impl ExportManifest {
    pub fn entry(&self, file: &str) -> Option<&ArtifactEntry> {
        self.artifacts.iter().find(|entry| entry.file == file)
    }
}

/// Writes the full set of deployment artifacts for one trained model.
pub struct Exporter<'a> {
    registry: &'a ClassIndexRegistry,
    input_shape: [usize; 3],
    compiler: Option<Box<dyn ModelCompiler + 'a>>,
}

impl<'a> Exporter<'a> {
    pub fn new(registry: &'a ClassIndexRegistry, input_shape: [usize; 3]) -> Self {
        Self {
            registry,
            input_shape,
            compiler: None,
        }
    }

    pub fn with_compiler(mut self, compiler: impl ModelCompiler + 'a) -> Self {
        self.compiler = Some(Box::new(compiler));
        self
    }

    pub fn metadata(&self) -> ExportedMetadata {
        export_metadata(self.registry, self.input_shape)
    }

    /// Writes metadata, labels and, when both a compiler and a model are given, the
    /// binary model, followed by the manifest.
    pub fn write_all(&self, out_dir: &Path, model_path: Option<&Path>) -> Result<ExportManifest, ClassifierError> {
        fs::create_dir_all(out_dir)?;
        let mut artifacts = Vec::new();

        let metadata = self.metadata();
        let metadata_json = serde_json::to_vec_pretty(&metadata)
            .map_err(|e| ClassifierError::Export(format!("Failed to serialize metadata: {}", e)))?;
        artifacts.push(write_artifact(out_dir, METADATA_FILE, &metadata_json)?);

        let mut labels = String::new();
        for label in &metadata.class_labels {
            labels.push_str(label);
            labels.push('\n');
        }
        artifacts.push(write_artifact(out_dir, LABELS_FILE, labels.as_bytes())?);

        match (&self.compiler, model_path) {
            (Some(compiler), Some(model_path)) => {
                let bytes = export_binary_model(compiler.as_ref(), model_path)?;
                artifacts.push(write_artifact(out_dir, BINARY_MODEL_FILE, &bytes)?);
            }
            (None, Some(model_path)) => {
                warn!("No model compiler configured, skipping binary export of {:?}", model_path);
            }
            _ => info!("Exporting metadata only"),
        }

        let manifest = ExportManifest {
            num_classes: self.registry.len(),
            artifacts,
        };
        let manifest_json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| ClassifierError::Export(format!("Failed to serialize manifest: {}", e)))?;
        write_file(&out_dir.join(MANIFEST_FILE), &manifest_json)?;

        info!("Exported {} artifacts to {:?}", manifest.artifacts.len(), out_dir);
        Ok(manifest)
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), ClassifierError> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(())
}

fn write_artifact(out_dir: &Path, file: &str, bytes: &[u8]) -> Result<ArtifactEntry, ClassifierError> {
    write_file(&out_dir.join(file), bytes)?;
    Ok(ArtifactEntry {
        file: file.to_string(),
        bytes: bytes.len() as u64,
        sha256: sha256_hex(bytes),
    })
}
