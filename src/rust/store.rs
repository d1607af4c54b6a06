use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::classifier::{ClassIndexRegistry, ClassifierError};
use crate::export::ExportedMetadata;

pub const MODEL_FILE: &str = "model.onnx";
pub const REGISTRY_FILE: &str = "class_indices.json";
pub const METADATA_FILE: &str = "model_metadata.json";
pub const HISTORY_FILE: &str = "training_history.json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Artifact not found: {0}")]
    NotFound(PathBuf),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

/// The directory where training artifacts live side by side: the trained model, the
/// class-index registry written when the training set was indexed, and training history.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    models_dir: PathBuf,
}

impl ArtifactStore {
    /// Creates an ArtifactStore with the default models directory
    pub fn new_default() -> io::Result<Self> {
        Self::new(Self::get_default_models_dir())
    }

    /// Returns the default models directory path
    pub fn get_default_models_dir() -> PathBuf {
        // 1. Check environment variable
        if let Ok(path) = env::var("ARTHROLENS_HOME") {
            return PathBuf::from(path).join("models");
        }

        // 2. Use platform-specific data directory
        if let Some(data_dir) = dirs::data_dir() {
            return data_dir.join("arthrolens").join("models");
        }

        // 3. Fallback to user's home directory
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(".arthrolens").join("models");
        }

        env::temp_dir().join("arthrolens").join("models")
    }

    pub fn new<P: AsRef<Path>>(models_dir: P) -> io::Result<Self> {
        let models_dir = models_dir.as_ref().to_path_buf();
        fs::create_dir_all(&models_dir)?;
        Ok(Self { models_dir })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn model_path(&self) -> PathBuf {
        self.models_dir.join(MODEL_FILE)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.models_dir.join(REGISTRY_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.models_dir.join(METADATA_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.models_dir.join(HISTORY_FILE)
    }

    /// True once both the model and its registry are present.
    pub fn is_trained(&self) -> bool {
        let model_path = self.model_path();
        let registry_path = self.registry_path();
        log::debug!("Model path: {:?} (exists: {})", model_path, model_path.exists());
        log::debug!("Registry path: {:?} (exists: {})", registry_path, registry_path.exists());
        model_path.exists() && registry_path.exists()
    }

    pub fn load_registry(&self) -> Result<ClassIndexRegistry, ClassifierError> {
        ClassIndexRegistry::load_file(self.registry_path())
    }

    pub fn save_registry(&self, registry: &ClassIndexRegistry) -> Result<(), ClassifierError> {
        let path = self.registry_path();
        if path.exists() {
            log::warn!("Overwriting class index registry at {:?}", path);
        }
        registry.save(path)
    }

    /// Loads the saved deployment metadata, refusing it if its labels no longer line up
    /// with `registry` (for example after re-indexing a new training set).
    pub fn load_metadata(&self, registry: &ClassIndexRegistry) -> Result<ExportedMetadata, ClassifierError> {
        let metadata = ExportedMetadata::load_file(self.metadata_path())?;
        metadata.verify_against(registry)?;
        Ok(metadata)
    }

    /// Verifies the model file against a known SHA-256 digest.
    pub fn verify_model(&self, expected_hash: &str) -> Result<(), StoreError> {
        verify_file(&self.model_path(), expected_hash)
    }
}

/// Lowercase hex SHA-256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn file_checksum(path: &Path) -> Result<String, StoreError> {
    if !path.exists() {
        return Err(StoreError::NotFound(path.to_path_buf()));
    }
    let bytes = fs::read(path)?;
    log::debug!("Hashing {} bytes from {:?}", bytes.len(), path);
    Ok(sha256_hex(&bytes))
}

pub fn verify_file(path: &Path, expected_hash: &str) -> Result<(), StoreError> {
    let actual = file_checksum(path)?;
    if !actual.eq_ignore_ascii_case(expected_hash) {
        log::error!("Hash mismatch for {:?}: expected {}, got {}", path, expected_hash, actual);
        return Err(StoreError::HashMismatch {
            path: path.to_path_buf(),
            expected: expected_hash.to_string(),
            actual,
        });
    }
    log::info!("Verified {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::Exporter;

    #[test]
    fn test_paths_are_colocated() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("models")).unwrap();
        assert!(store.models_dir().exists());
        assert!(store.model_path().ends_with("models/model.onnx"));
        assert!(store.registry_path().ends_with("models/class_indices.json"));
        assert!(!store.is_trained());
    }

    #[test]
    fn test_registry_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let registry = ClassIndexRegistry::build(["normal", "arthritis"]).unwrap();
        store.save_registry(&registry).unwrap();
        assert_eq!(store.load_registry().unwrap(), registry);
    }

    #[test]
    fn test_load_metadata_checks_registry() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let registry = ClassIndexRegistry::build(["normal", "arthritis"]).unwrap();
        Exporter::new(&registry, [256, 256, 3]).write_all(store.models_dir(), None).unwrap();

        assert_eq!(store.load_metadata(&registry).unwrap().input_size, [256, 256, 3]);

        let reordered = ClassIndexRegistry::build(["arthritis", "normal"]).unwrap();
        assert!(matches!(store.load_metadata(&reordered), Err(ClassifierError::Export(_))));
    }

    #[test]
    fn test_load_metadata_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let registry = ClassIndexRegistry::build(["normal"]).unwrap();
        assert!(matches!(store.load_metadata(&registry), Err(ClassifierError::Io(_))));
    }

    #[test]
    fn test_checksum_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        fs::write(store.model_path(), b"abc").unwrap();

        let expected = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        assert_eq!(file_checksum(&store.model_path()).unwrap(), expected);
        assert!(store.verify_model(expected).is_ok());
        assert!(matches!(
            store.verify_model("00"),
            Err(StoreError::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        assert!(matches!(store.verify_model("00"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_default_models_dir() {
        env::set_var("ARTHROLENS_HOME", "/tmp/arthrolens-test-home");
        let path = ArtifactStore::get_default_models_dir();
        assert!(path.to_str().unwrap().contains("/tmp/arthrolens-test-home/models"));
        env::remove_var("ARTHROLENS_HOME");

        let path = ArtifactStore::get_default_models_dir();
        assert!(path.to_str().unwrap().contains("models"));
    }
}
