use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Serialize;

use crate::classifier::{decode_batch_output, ClassIndexRegistry, ClassifierError, ImageModel, Preprocessor};

/// File extensions picked up when walking a labelled image directory.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "ppm", "tif", "tiff"];

/// Square count matrix: rows are true classes, columns are predicted classes,
/// both indexed by registry index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    counts: Vec<Vec<u64>>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            counts: vec![vec![0; num_classes]; num_classes],
        }
    }

    /// Builds a matrix from paired true/predicted indices.
    pub fn from_pairs(num_classes: usize, truth: &[usize], predicted: &[usize]) -> Result<Self, ClassifierError> {
        if truth.len() != predicted.len() {
            return Err(ClassifierError::shape_mismatch(
                format!("{} predictions", truth.len()),
                format!("{} predictions", predicted.len()),
            ));
        }
        let mut matrix = Self::new(num_classes);
        for (&t, &p) in truth.iter().zip(predicted) {
            matrix.record(t, p)?;
        }
        Ok(matrix)
    }

    pub fn record(&mut self, truth: usize, predicted: usize) -> Result<(), ClassifierError> {
        let len = self.num_classes();
        for index in [truth, predicted] {
            if index >= len {
                return Err(ClassifierError::IndexOutOfRange { index, len });
            }
        }
        self.counts[truth][predicted] += 1;
        Ok(())
    }

    pub fn num_classes(&self) -> usize {
        self.counts.len()
    }

    pub fn get(&self, truth: usize, predicted: usize) -> u64 {
        self.counts[truth][predicted]
    }

    pub fn rows(&self) -> &[Vec<u64>] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    pub fn max_count(&self) -> u64 {
        self.counts.iter().flatten().copied().max().unwrap_or(0)
    }

    fn column_sum(&self, predicted: usize) -> u64 {
        self.counts.iter().map(|row| row[predicted]).sum()
    }
}

/// Precision, recall and F1 for one class.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: u64,
}

/// Precision, recall and F1 averaged over classes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AverageMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl AverageMetrics {
    /// Unweighted mean over classes.
    fn macro_average(classes: &[ClassMetrics]) -> Self {
        let n = classes.len() as f64;
        Self {
            precision: classes.iter().map(|c| c.precision).sum::<f64>() / n,
            recall: classes.iter().map(|c| c.recall).sum::<f64>() / n,
            f1: classes.iter().map(|c| c.f1).sum::<f64>() / n,
        }
    }

    /// Mean weighted by class support; zero when there are no samples.
    fn weighted_average(classes: &[ClassMetrics], total: u64) -> Self {
        if total == 0 {
            return Self { precision: 0.0, recall: 0.0, f1: 0.0 };
        }
        let weighted = |metric: fn(&ClassMetrics) -> f64| {
            classes.iter().map(|c| metric(c) * c.support as f64).sum::<f64>() / total as f64
        };
        Self {
            precision: weighted(|c: &ClassMetrics| c.precision),
            recall: weighted(|c: &ClassMetrics| c.recall),
            f1: weighted(|c: &ClassMetrics| c.f1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_avg: AverageMetrics,
    pub weighted_avg: AverageMetrics,
    pub total: u64,
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl ClassificationReport {
    /// Summarises a confusion matrix. Undefined ratios (no predictions or no support
    /// for a class) are reported as 0.
    pub fn from_matrix(matrix: &ConfusionMatrix, registry: &ClassIndexRegistry) -> Result<Self, ClassifierError> {
        if matrix.num_classes() != registry.len() {
            return Err(ClassifierError::shape_mismatch(
                format!("{} classes", registry.len()),
                format!("{} classes", matrix.num_classes()),
            ));
        }

        let classes: Vec<ClassMetrics> = registry
            .ordered_names()
            .iter()
            .enumerate()
            .map(|(i, label)| {
                let true_positive = matrix.get(i, i);
                let support: u64 = matrix.rows()[i].iter().sum();
                let precision = ratio(true_positive, matrix.column_sum(i));
                let recall = ratio(true_positive, support);
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassMetrics {
                    label: label.clone(),
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect();

        let total = matrix.total();
        let correct: u64 = (0..matrix.num_classes()).map(|i| matrix.get(i, i)).sum();
        let macro_avg = AverageMetrics::macro_average(&classes);
        let weighted_avg = AverageMetrics::weighted_average(&classes, total);

        Ok(Self {
            classes,
            accuracy: ratio(correct, total),
            macro_avg,
            weighted_avg,
            total,
        })
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .classes
            .iter()
            .map(|c| c.label.len())
            .chain(["weighted avg".len()])
            .max()
            .unwrap_or(8);

        writeln!(f, "{:>width$}  {:>9} {:>9} {:>9} {:>9}", "", "precision", "recall", "f1-score", "support")?;
        writeln!(f)?;
        for class in &self.classes {
            writeln!(
                f,
                "{:>width$}  {:>9.2} {:>9.2} {:>9.2} {:>9}",
                class.label, class.precision, class.recall, class.f1, class.support
            )?;
        }
        writeln!(f)?;
        writeln!(f, "{:>width$}  {:>9} {:>9} {:>9.2} {:>9}", "accuracy", "", "", self.accuracy, self.total)?;
        for (name, avg) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>width$}  {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, avg.precision, avg.recall, avg.f1, self.total
            )?;
        }
        Ok(())
    }
}

/// Outcome of running a model over a labelled directory.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub matrix: ConfusionMatrix,
    pub report: ClassificationReport,
}

/// Lists `(class directory name, image path)` pairs under `data_dir`, sorted for
/// reproducible runs.
pub fn collect_labelled_images(data_dir: &Path) -> Result<Vec<(String, PathBuf)>, ClassifierError> {
    let mut samples = Vec::new();
    for class_entry in fs::read_dir(data_dir)? {
        let class_entry = class_entry?;
        if !class_entry.path().is_dir() {
            continue;
        }
        let class_name = class_entry.file_name().to_string_lossy().to_string();
        for file in fs::read_dir(class_entry.path())? {
            let path = file?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_image && path.is_file() {
                samples.push((class_name.clone(), path));
            }
        }
    }
    samples.sort();
    Ok(samples)
}

/// Runs `model` over every image in `data_dir/<class>/`.
///
/// Class directories are resolved through the persisted registry; a directory the
/// registry does not know fails with `UnknownClass` instead of being re-indexed.
pub fn evaluate(
    model: &dyn ImageModel,
    registry: &ClassIndexRegistry,
    preprocessor: &Preprocessor,
    data_dir: &Path,
) -> Result<Evaluation, ClassifierError> {
    let samples = collect_labelled_images(data_dir)?;
    if samples.is_empty() {
        return Err(ClassifierError::InvalidInput(
            format!("No labelled images found in {}", data_dir.display())
        ));
    }
    info!("Evaluating {} images from {:?}", samples.len(), data_dir);

    let mut matrix = ConfusionMatrix::new(registry.len());
    for (class_name, path) in &samples {
        let truth = registry.index_of(class_name)?;
        let tensor = preprocessor.prepare_path(path)?;
        let prediction = decode_batch_output(&model.predict(&tensor)?, registry)?;
        debug!("{:?}: true '{}', predicted '{}'", path, class_name, prediction.class_name);
        matrix.record(truth, prediction.class_index)?;
    }

    let report = ClassificationReport::from_matrix(&matrix, registry)?;
    info!("Accuracy {:.4} over {} images", report.accuracy, report.total);
    Ok(Evaluation { matrix, report })
}
