use std::fs;
use std::path::Path;

use arthrolens::evaluation::{self, collect_labelled_images};
use arthrolens::export::{Exporter, ExportedMetadata, LABELS_FILE};
use arthrolens::store::METADATA_FILE;
use arthrolens::{ArtifactStore, ClassIndexRegistry, Classifier, ClassifierError, ImageModel, TargetSize};
use env_logger::{Builder, Env};
use image::{Rgb, RgbImage};
use ndarray::{Array2, Array4, Axis};

// Initialize test logger
fn init() {
    let _ = Builder::from_env(Env::default().default_filter_or("warn"))
        .is_test(true)
        .try_init();
}

/// Stand-in network: class i scores the mean intensity of colour channel i.
struct ChannelMeanModel {
    classes: usize,
}

impl ImageModel for ChannelMeanModel {
    fn predict(&self, input: &Array4<f32>) -> Result<Array2<f32>, ClassifierError> {
        let pixels = (input.shape()[1] * input.shape()[2]) as f32;
        let mut scores = Array2::zeros((1, self.classes));
        for c in 0..self.classes.min(3) {
            scores[[0, c]] = input.index_axis(Axis(3), c).sum() / pixels;
        }
        Ok(scores)
    }

    fn input_shape(&self) -> Option<[usize; 3]> {
        Some([8, 8, 3])
    }
}

fn write_png(path: &Path, color: [u8; 3]) {
    RgbImage::from_pixel(12, 9, Rgb(color)).save(path).unwrap();
}

/// `blue`, `green`, `red` sort so that blue=0, green=1, red=2, which is not RGB order.
/// Images are coloured so the channel model maps red->0, green->1, blue->2.
fn training_set(root: &Path) {
    for (class, color) in [("blue", [0, 0, 255]), ("green", [0, 255, 0]), ("red", [255, 0, 0])] {
        let dir = root.join(class);
        fs::create_dir_all(&dir).unwrap();
        write_png(&dir.join("a.png"), color);
        write_png(&dir.join("b.PNG"), color);
        fs::write(dir.join("notes.txt"), "ignored").unwrap();
    }
}

#[test]
fn test_index_classify_export_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    init();
    let dir = tempfile::tempdir()?;
    let data_dir = dir.path().join("data");
    training_set(&data_dir);

    let store = ArtifactStore::new(dir.path().join("models"))?;
    store.save_registry(&ClassIndexRegistry::from_class_dirs(&data_dir)?)?;
    let registry = store.load_registry()?;
    assert_eq!(registry.ordered_names(), ["blue", "green", "red"]);

    let classifier = Classifier::builder()
        .with_model(ChannelMeanModel { classes: 3 })
        .with_registry(registry)
        .build()?;
    assert_eq!(classifier.preprocessor().target_size(), TargetSize::square(8)?);

    // A red image lights up output column 0, which the registry calls "blue".
    let prediction = classifier.classify_path(data_dir.join("red").join("a.png"))?;
    assert_eq!(prediction.class_index, 0);
    assert_eq!(prediction.class_name, "blue");
    assert!((prediction.confidence - 1.0).abs() < 1e-6);

    let out_dir = dir.path().join("export");
    Exporter::new(classifier.registry(), classifier.info().input_shape).write_all(&out_dir, None)?;
    let metadata: ExportedMetadata = serde_json::from_slice(&fs::read(out_dir.join(METADATA_FILE))?)?;
    assert_eq!(metadata.input_size, [8, 8, 3]);
    assert_eq!(metadata.class_labels[prediction.class_index], prediction.class_name);
    assert_eq!(fs::read_to_string(out_dir.join(LABELS_FILE))?, "blue\ngreen\nred\n");
    Ok(())
}

#[test]
fn test_evaluate_labelled_directory() -> Result<(), Box<dyn std::error::Error>> {
    init();
    let dir = tempfile::tempdir()?;
    training_set(dir.path());
    assert_eq!(collect_labelled_images(dir.path())?.len(), 6);

    let registry = ClassIndexRegistry::from_class_dirs(dir.path())?;
    let classifier = Classifier::builder()
        .with_model(ChannelMeanModel { classes: 3 })
        .with_registry(registry)
        .build()?;

    let result = evaluation::evaluate(
        classifier.model(),
        classifier.registry(),
        classifier.preprocessor(),
        dir.path(),
    )?;

    // green is the only class whose colour channel matches its registry index
    assert_eq!(result.matrix.get(1, 1), 2);
    assert_eq!(result.matrix.get(0, 2), 2);
    assert_eq!(result.matrix.get(2, 0), 2);
    assert_eq!(result.report.total, 6);
    assert!((result.report.accuracy - 1.0 / 3.0).abs() < 1e-12);
    Ok(())
}

#[test]
fn test_evaluate_rejects_unknown_class_directory() -> Result<(), Box<dyn std::error::Error>> {
    init();
    let dir = tempfile::tempdir()?;
    training_set(dir.path());
    let registry = ClassIndexRegistry::build(["blue", "green"])?;
    let classifier = Classifier::builder()
        .with_model(ChannelMeanModel { classes: 2 })
        .with_registry(registry)
        .build()?;

    let result = evaluation::evaluate(
        classifier.model(),
        classifier.registry(),
        classifier.preprocessor(),
        dir.path(),
    );
    assert!(matches!(result, Err(ClassifierError::UnknownClass(name)) if name == "red"));
    Ok(())
}

#[test]
fn test_unreadable_image() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("broken.png");
    fs::write(&path, b"\x89PNG truncated")?;

    let classifier = Classifier::builder()
        .with_model(ChannelMeanModel { classes: 2 })
        .with_registry(ClassIndexRegistry::build(["normal", "arthritis"])?)
        .build()?;
    assert!(matches!(classifier.classify_path(&path), Err(ClassifierError::InvalidImage(_))));
    Ok(())
}
