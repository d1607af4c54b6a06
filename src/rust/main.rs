use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use arthrolens::chat::{self, ChatClient, ChatConfig};
use arthrolens::evaluation;
use arthrolens::export::Exporter;
use arthrolens::report::{self, TrainingHistory};
use arthrolens::{
    ArtifactStore, ClassIndexRegistry, Classifier, ImageModel, OnnxImageModel, OnnxModelCompiler, OptimizationLevel,
    RuntimeConfig, TargetSize,
};
use clap::{Args, Parser, Subcommand};
use log::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding model.onnx and class_indices.json
    /// [default: $ARTHROLENS_HOME/models or the platform data dir]
    #[arg(long, global = true)]
    models_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ModelArgs {
    /// Path to the trained ONNX model [default: <models-dir>/model.onnx]
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Path to the class-index registry [default: <models-dir>/class_indices.json]
    #[arg(short, long)]
    registry: Option<PathBuf>,

    /// Square input size, overriding what the model declares
    #[arg(long)]
    input_size: Option<u32>,

    /// ONNX Runtime intra-op threads (0 lets the runtime decide)
    #[arg(long, default_value_t = 0)]
    threads: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Write the class-index registry from the class subdirectories of a training set
    Index {
        /// Training directory with one subdirectory per class
        #[arg(long, default_value = "data/train")]
        data_dir: PathBuf,
        /// Output file [default: <models-dir>/class_indices.json]
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Classify one image
    Predict {
        /// Path to input image
        #[arg(short, long)]
        image: PathBuf,
        #[command(flatten)]
        model: ModelArgs,
        /// Where to save the visualization
        #[arg(long, default_value = "static/prediction_result.png")]
        plot: PathBuf,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
        /// Also write deployment artifacts to this directory
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },
    /// Write deployment artifacts (metadata, labels, optimized model, manifest)
    Export {
        #[command(flatten)]
        model: ModelArgs,
        /// Output directory
        #[arg(short, long, default_value = "export")]
        out_dir: PathBuf,
        /// Skip the optimized model binary
        #[arg(long)]
        metadata_only: bool,
    },
    /// Score the model on a labelled directory and print a classification report
    Evaluate {
        /// Directory with one subdirectory per class
        #[arg(long, default_value = "data/validation")]
        data_dir: PathBuf,
        #[command(flatten)]
        model: ModelArgs,
        /// Where to save the confusion matrix heat-map
        #[arg(long)]
        plot: Option<PathBuf>,
    },
    /// Render accuracy and loss curves from a training history file
    PlotHistory {
        /// History JSON [default: <models-dir>/training_history.json]
        #[arg(long)]
        history: Option<PathBuf>,
        #[arg(short, long, default_value = "training_history.png")]
        out: PathBuf,
    },
    /// Interactive chat with a hosted language model
    Chat {
        #[arg(long, default_value = chat::DEFAULT_MODEL)]
        model: String,
        #[arg(long, default_value_t = 1024)]
        max_tokens: u32,
    },
}

fn open_store(models_dir: Option<&Path>) -> Result<ArtifactStore> {
    let store = match models_dir {
        Some(dir) => ArtifactStore::new(dir),
        None => ArtifactStore::new_default(),
    };
    let store = store.context("Failed to open models directory")?;
    info!("Using models directory {}", store.models_dir().display());
    Ok(store)
}

fn resolve_registry(store: &ArtifactStore, args: &ModelArgs) -> Result<ClassIndexRegistry> {
    let path = args.registry.clone().unwrap_or_else(|| store.registry_path());
    ClassIndexRegistry::load_file(&path)
        .with_context(|| format!("Failed to load class index registry {}", path.display()))
}

fn runtime_config(args: &ModelArgs) -> RuntimeConfig {
    RuntimeConfig {
        intra_threads: args.threads,
        optimization_level: OptimizationLevel::All,
        ..RuntimeConfig::default()
    }
}

fn build_classifier(store: &ArtifactStore, args: &ModelArgs) -> Result<Classifier> {
    let model_path = args.model.clone().unwrap_or_else(|| store.model_path());
    let mut builder = Classifier::builder()
        .with_runtime_config(runtime_config(args))
        .with_onnx_model(&model_path)
        .with_context(|| format!("Failed to load model {}", model_path.display()))?
        .with_registry(resolve_registry(store, args)?);
    if let Some(side) = args.input_size {
        builder = builder.with_target_size(TargetSize::square(side)?);
    }
    Ok(builder.build()?)
}

fn run_index(store: &ArtifactStore, data_dir: &Path, out: Option<PathBuf>) -> Result<()> {
    let registry = ClassIndexRegistry::from_class_dirs(data_dir)
        .with_context(|| format!("Failed to index classes in {}", data_dir.display()))?;
    match out {
        Some(path) => registry.save(&path)?,
        None => store.save_registry(&registry)?,
    }
    for (index, name) in registry.ordered_names().iter().enumerate() {
        println!("{:>3}  {}", index, name);
    }
    Ok(())
}

fn run_predict(
    store: &ArtifactStore,
    image: &Path,
    args: &ModelArgs,
    plot: &Path,
    json: bool,
    export_dir: Option<&Path>,
) -> Result<()> {
    let classifier = build_classifier(store, args)?;
    let prediction = classifier
        .classify_path(image)
        .with_context(|| format!("Failed to classify {}", image.display()))?;

    let source = image::open(image).with_context(|| format!("Failed to open {}", image.display()))?;
    report::render_prediction(&source, &prediction, plot)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&prediction)?);
    } else {
        println!("\nPrediction Results:");
        println!("Class: {}", prediction.class_name);
        println!("Confidence: {:.2}%", prediction.confidence * 100.0);
        println!("Severity: {}", prediction.severity());
        println!("All probabilities:");
        for class in &prediction.all_classes {
            println!("  {}: {:.2}%", class.label, class.score * 100.0);
        }
    }

    if let Some(out_dir) = export_dir {
        let input_shape = classifier.info().input_shape;
        let manifest = Exporter::new(classifier.registry(), input_shape).write_all(out_dir, None)?;
        info!("Wrote {} artifacts to {}", manifest.artifacts.len(), out_dir.display());
    }
    Ok(())
}

fn run_export(store: &ArtifactStore, args: &ModelArgs, out_dir: &Path, metadata_only: bool) -> Result<()> {
    let registry = resolve_registry(store, args)?;
    let model_path = args.model.clone().unwrap_or_else(|| store.model_path());

    let explicit = args.input_size.map(TargetSize::square).transpose()?;
    let input_shape = match explicit {
        Some(target) if metadata_only => target.input_shape(),
        None if metadata_only && !model_path.exists() => {
            store
                .load_metadata(&registry)
                .context("No model to read the input size from; pass --input-size")?
                .input_size
        }
        _ => {
            let model = OnnxImageModel::load(&model_path, &runtime_config(args)).with_context(|| {
                format!("Failed to read the input size from {}; pass --input-size", model_path.display())
            })?;
            TargetSize::resolve(explicit, model.input_shape())?.input_shape()
        }
    };

    let exporter = Exporter::new(&registry, input_shape);
    let manifest = if metadata_only {
        exporter.write_all(out_dir, None)?
    } else {
        exporter
            .with_compiler(OnnxModelCompiler::new(runtime_config(args)))
            .write_all(out_dir, Some(&model_path))?
    };

    for entry in &manifest.artifacts {
        println!("{:<24} {:>10} bytes  sha256:{}", entry.file, entry.bytes, entry.sha256);
    }
    Ok(())
}

fn run_evaluate(store: &ArtifactStore, data_dir: &Path, args: &ModelArgs, plot: Option<&Path>) -> Result<()> {
    let classifier = build_classifier(store, args)?;
    let evaluation = evaluation::evaluate(
        classifier.model(),
        classifier.registry(),
        classifier.preprocessor(),
        data_dir,
    )
    .with_context(|| format!("Failed to evaluate on {}", data_dir.display()))?;

    println!("\nClassification Report:");
    println!("{}", evaluation.report);
    if let Some(path) = plot {
        report::render_confusion_matrix(&evaluation.matrix, path)?;
    }
    Ok(())
}

fn run_plot_history(store: &ArtifactStore, history: Option<PathBuf>, out: &Path) -> Result<()> {
    let path = history.unwrap_or_else(|| store.history_path());
    let history = TrainingHistory::load_file(&path)
        .with_context(|| format!("Failed to read training history {}", path.display()))?;
    info!("Plotting {} epochs", history.epochs());
    report::render_training_history(&history, out)?;
    Ok(())
}

async fn run_chat(model: String, max_tokens: u32) -> Result<()> {
    let config = ChatConfig {
        model,
        max_tokens,
        ..ChatConfig::default()
    };
    let mut client = ChatClient::from_env(config)?;
    let stdin = io::stdin();
    chat::run_repl(&mut client, stdin.lock(), io::stdout()).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let Cli { models_dir, command } = Cli::parse();
    let models_dir = models_dir.as_deref();

    match command {
        Command::Index { data_dir, out } => run_index(&open_store(models_dir)?, &data_dir, out),
        Command::Predict { image, model, plot, json, export_dir } => {
            run_predict(&open_store(models_dir)?, &image, &model, &plot, json, export_dir.as_deref())
        }
        Command::Export { model, out_dir, metadata_only } => {
            run_export(&open_store(models_dir)?, &model, &out_dir, metadata_only)
        }
        Command::Evaluate { data_dir, model, plot } => {
            run_evaluate(&open_store(models_dir)?, &data_dir, &model, plot.as_deref())
        }
        Command::PlotHistory { history, out } => run_plot_history(&open_store(models_dir)?, history, &out),
        Command::Chat { model, max_tokens } => run_chat(model, max_tokens).await,
    }
}
