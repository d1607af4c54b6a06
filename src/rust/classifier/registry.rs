use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use log::{debug, info};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

use super::error::ClassifierError;

/// The persisted mapping between class names and the indices of the model's output vector.
///
/// Indices are always exactly `0..len()`; the registry cannot be constructed otherwise.
/// It is created once per training run, either from an explicit list of names or by
/// scanning the class subdirectories of a training set, and is read-only afterwards.
///
/// # Example
/// ```
/// use arthrolens::ClassIndexRegistry;
///
/// let registry = ClassIndexRegistry::build(["healthy", "osteoarthritis"]).unwrap();
/// assert_eq!(registry.index_of("osteoarthritis").unwrap(), 1);
/// assert_eq!(registry.name_at(0).unwrap(), "healthy");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassIndexRegistry {
    names: Vec<String>,
    indices: HashMap<String, usize>,
}

impl ClassIndexRegistry {
    /// Assigns index `i` to the `i`-th name.
    ///
    /// # Errors
    /// * `InvalidInput` if no names are given, a name is empty, or a name repeats
    pub fn build<I, S>(class_names: I) -> Result<Self, ClassifierError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = class_names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(ClassifierError::InvalidInput("At least one class name is required".into()));
        }

        let mut indices = HashMap::with_capacity(names.len());
        for (index, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(ClassifierError::InvalidInput(
                    format!("Class name at position {} is empty", index)
                ));
            }
            if indices.insert(name.clone(), index).is_some() {
                return Err(ClassifierError::InvalidInput(
                    format!("Duplicate class name '{}'", name)
                ));
            }
        }

        Ok(Self { names, indices })
    }

    /// Builds a registry from the immediate subdirectories of `dir`, sorted by name.
    ///
    /// This mirrors how the training data loader discovers classes, so the resulting
    /// indices line up with the columns of the trained model's output.
    pub fn from_class_dirs<P: AsRef<Path>>(dir: P) -> Result<Self, ClassifierError> {
        let dir = dir.as_ref();
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            // follow symlinks: a linked class folder is still a class
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().into_string().map_err(|raw| {
                ClassifierError::InvalidInput(format!("Class directory name is not UTF-8: {:?}", raw))
            })?;
            names.push(name);
        }

        if names.is_empty() {
            return Err(ClassifierError::InvalidInput(
                format!("No class subdirectories found in {}", dir.display())
            ));
        }
        names.sort();
        info!("Discovered {} classes in {}: {:?}", names.len(), dir.display(), names);
        Self::build(names)
    }

    /// Parses a persisted `{"name": index}` map.
    ///
    /// # Errors
    /// * `CorruptData` if the JSON is malformed, a value is not a non-negative integer,
    ///   or the indices are not exactly `0..N`
    pub fn load<R: Read>(source: R) -> Result<Self, ClassifierError> {
        let raw: HashMap<String, Value> = serde_json::from_reader(source)
            .map_err(|e| ClassifierError::CorruptData(format!("Registry is not a JSON object: {}", e)))?;
        if raw.is_empty() {
            return Err(ClassifierError::CorruptData("Registry contains no classes".into()));
        }

        let len = raw.len();
        let mut slots: Vec<Option<String>> = vec![None; len];
        for (name, value) in raw {
            let index = value.as_u64().ok_or_else(|| {
                ClassifierError::CorruptData(
                    format!("Index for class '{}' is not a non-negative integer: {}", name, value)
                )
            })?;
            let slot = usize::try_from(index)
                .ok()
                .and_then(|i| slots.get_mut(i))
                .ok_or_else(|| ClassifierError::CorruptData(
                    format!("Index {} for class '{}' leaves a gap in 0..{}", index, name, len)
                ))?;
            if let Some(existing) = slot {
                return Err(ClassifierError::CorruptData(
                    format!("Classes '{}' and '{}' share index {}", existing, name, index)
                ));
            }
            *slot = Some(name);
        }

        // With len entries and no duplicates every slot is filled; names are map keys so
        // they are already unique.
        let names: Vec<String> = slots.into_iter().flatten().collect();
        Self::build(names).map_err(|e| ClassifierError::CorruptData(e.to_string()))
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, ClassifierError> {
        let path = path.as_ref();
        debug!("Loading class index registry from {:?}", path);
        let file = fs::File::open(path)?;
        let registry = Self::load(std::io::BufReader::new(file))?;
        info!("Loaded {} classes from {:?}", registry.len(), path);
        Ok(registry)
    }

    /// Writes the registry as a JSON object in index order.
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<(), ClassifierError> {
        serde_json::to_writer_pretty(writer, self)
            .map_err(|e| ClassifierError::Io(e.into()))
    }

    /// Persists the registry, replacing any file from a previous training run.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ClassifierError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(path)?;
        self.to_writer(&mut file)?;
        file.flush()?;
        info!("Saved {} classes to {:?}", self.len(), path);
        Ok(())
    }

    pub fn name_at(&self, index: usize) -> Result<&str, ClassifierError> {
        self.names
            .get(index)
            .map(String::as_str)
            .ok_or(ClassifierError::IndexOutOfRange { index, len: self.len() })
    }

    pub fn index_of(&self, name: &str) -> Result<usize, ClassifierError> {
        self.indices
            .get(name)
            .copied()
            .ok_or_else(|| ClassifierError::UnknownClass(name.to_string()))
    }

    /// Names sorted by ascending index. Every consumer of class identity uses this order.
    pub fn ordered_names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Serialize for ClassIndexRegistry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.names.len()))?;
        for (index, name) in self.names.iter().enumerate() {
            map.serialize_entry(name, &index)?;
        }
        map.end()
    }
}
