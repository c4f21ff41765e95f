//! Detbatch: detection post-processing and batch annotation.
//!
//! Detbatch takes the raw output of an object-detection model, filters it by
//! confidence and overlap, rescales it from the model's input resolution to
//! each image's own resolution, and renders or exports the result. The same
//! pipeline runs over a whole zip archive of images, streaming one entry at a
//! time into an output archive of CSV exports.
//!
//! # Modules
//!
//! - [`ir`]: Boxes, reference frames, detection records, label and CSV formats
//! - [`filter`]: Confidence thresholding and non-maximum suppression
//! - [`annotate`]: Rescaling and rendering onto images
//! - [`infer`]: Inference and image decoding collaborators
//! - [`pipeline`]: The single-image path
//! - [`compare`]: Ground truth vs. inference, side by side
//! - [`batch`]: Streaming zip archive processing
//! - [`config`]: YAML configuration
//! - [`error`]: Error types for detbatch operations

pub mod annotate;
pub mod batch;
pub mod compare;
pub mod config;
pub mod error;
pub mod filter;
pub mod infer;
pub mod ir;
pub mod pipeline;

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use annotate::{rescale_records, Annotator};
use batch::{BatchProcessor, CancelToken};
use config::PipelineConfig;
use filter::SuppressionPolicy;
use infer::{ImageCrateDecoder, ImageDecoder, Inference};
use ir::io_export_csv::{to_export_csv_string, write_export_csv};
use ir::io_labels::read_label_file;
use ir::{BoxRecord, Resolution};
use pipeline::Pipeline;

pub use error::DetbatchError;

/// The detbatch CLI application.
#[derive(Parser)]
#[command(name = "detbatch")]
#[command(version, author, about)]
#[command(propagate_version = true)]
struct Cli {
    /// YAML config file; command-line flags override its values.
    #[arg(long, global = true, env = "DETBATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug). RUST_LOG is used otherwise.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Detect objects in one image; write the annotated image and its CSV.
    Detect(DetectArgs),
    /// Annotate every image in a zip archive into an archive of CSV exports.
    Batch(BatchArgs),
    /// Render ground-truth labels and inferred detections side by side.
    Compare(CompareArgs),
    /// Convert a normalized label file to the export CSV in pixel space.
    Labels(LabelsArgs),
}

/// Pipeline settings shared by every subcommand that runs inference.
#[derive(clap::Args, Default)]
struct PipelineArgs {
    /// Confidence threshold in [0, 1] (inclusive).
    #[arg(long)]
    conf_thres: Option<f64>,

    /// IoU threshold in [0, 1] for non-maximum suppression.
    #[arg(long)]
    iou_thres: Option<f64>,

    /// Whether suppression crosses class boundaries.
    #[arg(long, value_enum)]
    suppression: Option<SuppressionPolicy>,

    /// Inference endpoint URI.
    #[arg(long, env = "DETBATCH_URI")]
    uri: Option<String>,

    /// Per-request inference timeout in seconds (0 disables it).
    #[arg(long)]
    timeout: Option<u64>,

    /// Model input resolution, e.g. 640x640.
    #[arg(long, value_parser = parse_resolution)]
    model_size: Option<Resolution>,
}

/// Rendering settings.
#[derive(clap::Args, Default)]
struct RenderArgs {
    /// Append the confidence to each label tag.
    #[arg(long)]
    show_confidence: bool,

    /// TrueType/OpenType font for label tags; boxes only without one.
    #[arg(long)]
    font: Option<PathBuf>,
}

/// Arguments for the detect subcommand.
#[derive(clap::Args)]
struct DetectArgs {
    /// Image to run detection on.
    image: PathBuf,

    /// Directory for the annotated image and CSV.
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    #[command(flatten)]
    pipeline: PipelineArgs,

    #[command(flatten)]
    render: RenderArgs,
}

/// Arguments for the batch subcommand.
#[derive(clap::Args)]
struct BatchArgs {
    /// Input zip archive of images.
    input: PathBuf,

    /// Output zip archive of CSV exports.
    output: PathBuf,

    /// Number of worker threads.
    #[arg(long)]
    workers: Option<usize>,

    /// Stop at the first failed image.
    #[arg(long)]
    fail_fast: bool,

    /// Print one progress line per image to stderr.
    #[arg(long)]
    progress: bool,

    /// Output format for the report.
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    report: ReportFormat,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

/// Arguments for the compare subcommand.
#[derive(clap::Args)]
struct CompareArgs {
    /// Image to annotate.
    image: PathBuf,

    /// Ground-truth label file (`class_id cx cy w h`, normalized).
    labels: PathBuf,

    /// Directory for the rendered images and CSVs.
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    #[command(flatten)]
    pipeline: PipelineArgs,

    #[command(flatten)]
    render: RenderArgs,
}

/// Arguments for the labels subcommand.
#[derive(clap::Args)]
struct LabelsArgs {
    /// Ground-truth label file (`class_id cx cy w h`, normalized).
    labels: PathBuf,

    /// Image the labels belong to; only its header is read.
    #[arg(long)]
    image: PathBuf,

    /// Output CSV file; stdout if omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Text,
    Json,
}

/// Run the detbatch CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), DetbatchError> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Some(Commands::Detect(args)) => run_detect(cli.config.as_deref(), args),
        Some(Commands::Batch(args)) => run_batch(cli.config.as_deref(), args),
        Some(Commands::Compare(args)) => run_compare(cli.config.as_deref(), args),
        Some(Commands::Labels(args)) => run_labels(args),
        None => {
            println!("detbatch {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Detection post-processing and batch annotation.");
            println!();
            println!("Run 'detbatch --help' for usage information.");
            Ok(())
        }
    }
}

/// Installs the stderr log subscriber. `-v` flags take precedence over
/// `RUST_LOG`; without either only warnings are shown.
fn init_tracing(verbose: u8) {
    let filter = match verbosity_directive(verbose) {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    // A subscriber may already be installed when embedded; that is fine.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Log level forced by `-v` (`info`) and `-vv` (`debug`).
fn verbosity_directive(verbose: u8) -> Option<&'static str> {
    match verbose {
        0 => None,
        1 => Some("info"),
        _ => Some("debug"),
    }
}

fn parse_resolution(s: &str) -> Result<Resolution, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let width: u32 = w.trim().parse().map_err(|e| format!("invalid width '{w}': {e}"))?;
    let height: u32 = h.trim().parse().map_err(|e| format!("invalid height '{h}': {e}"))?;
    if width == 0 || height == 0 {
        return Err(format!("resolution must be non-empty, got '{s}'"));
    }
    Ok(Resolution::new(width, height))
}

/// Loads the config file (if any) and applies command-line overrides.
fn load_config(
    path: Option<&Path>,
    pipeline: &PipelineArgs,
    render: Option<&RenderArgs>,
) -> Result<PipelineConfig, DetbatchError> {
    let mut config = match path {
        Some(path) => PipelineConfig::from_yaml_path(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(v) = pipeline.conf_thres {
        config.conf_thres = v;
    }
    if let Some(v) = pipeline.iou_thres {
        config.iou_thres = v;
    }
    if let Some(v) = pipeline.suppression {
        config.suppression = v;
    }
    if let Some(v) = &pipeline.uri {
        config.inference.uri = v.clone();
    }
    if let Some(v) = pipeline.timeout {
        config.inference.timeout_secs = (v > 0).then_some(v);
    }
    if let Some(v) = pipeline.model_size {
        config.model_frame = v;
    }
    if let Some(render) = render {
        if render.show_confidence {
            config.show_confidence = true;
        }
        if let Some(font) = &render.font {
            config.font = Some(font.clone());
        }
    }

    config.validate(path.unwrap_or(Path::new("<command line>")))?;
    Ok(config)
}

#[cfg(feature = "remote")]
fn build_inference(config: &PipelineConfig) -> Result<Box<dyn Inference>, DetbatchError> {
    let client = infer::http::HttpInference::builder(config.inference.uri.clone())
        .timeout(config.inference.timeout_secs.map(std::time::Duration::from_secs))
        .model_frame(config.model_frame)
        .layout(config.inference.layout)
        .channel_order(config.inference.channel_order)
        .build();
    tracing::info!(uri = %client.uri(), "using HTTP inference");
    Ok(Box::new(client))
}

#[cfg(not(feature = "remote"))]
fn build_inference(_config: &PipelineConfig) -> Result<Box<dyn Inference>, DetbatchError> {
    Err(DetbatchError::InferenceUnavailable(
        "detbatch was built without the 'remote' feature".to_string(),
    ))
}

fn build_annotator(config: &PipelineConfig) -> Result<Annotator, DetbatchError> {
    let mut annotator = Annotator::new()
        .with_thickness(config.box_thickness)
        .with_font_size(config.font_size);
    if let Some(path) = &config.font {
        annotator = annotator.with_font(Annotator::load_font(path)?);
    }
    Ok(annotator)
}

fn load_image(path: &Path) -> Result<image::RgbImage, DetbatchError> {
    let bytes = fs::read(path).map_err(DetbatchError::Io)?;
    let name = path.to_string_lossy();
    Ok(ImageCrateDecoder.decode(&name, &bytes)?)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}

fn save_png(image: &image::RgbImage, path: &Path) -> Result<(), DetbatchError> {
    image
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|source| DetbatchError::ImageWrite {
            path: path.to_path_buf(),
            source,
        })
}

/// Writes `{stem}{suffix}.png` (when rendered) and `{stem}{suffix}.csv`.
fn write_outputs<T: BoxRecord>(
    output_dir: &Path,
    stem: &str,
    suffix: &str,
    annotated: &annotate::Annotated<T>,
) -> Result<(), DetbatchError> {
    if let Some(image) = &annotated.image {
        let png_path = output_dir.join(format!("{stem}{suffix}.png"));
        save_png(image, &png_path)?;
        println!("Wrote {}", png_path.display());
    }
    let csv_path = output_dir.join(format!("{stem}{suffix}.csv"));
    write_export_csv(&csv_path, &annotated.records.items)?;
    println!(
        "Wrote {} ({} box(es))",
        csv_path.display(),
        annotated.records.len()
    );
    Ok(())
}

/// Execute the detect subcommand.
fn run_detect(config_path: Option<&Path>, args: DetectArgs) -> Result<(), DetbatchError> {
    let config = load_config(config_path, &args.pipeline, Some(&args.render))?;
    let inference = build_inference(&config)?;
    let annotator = build_annotator(&config)?;
    let image = load_image(&args.image)?;

    let pipeline = Pipeline::new(inference.as_ref(), config.filter_options()?);
    let annotated = pipeline.annotate(&image, &annotator, config.show_confidence)?;

    fs::create_dir_all(&args.output_dir).map_err(DetbatchError::Io)?;
    write_outputs(
        &args.output_dir,
        &file_stem(&args.image),
        &config.batch.result_suffix,
        &annotated,
    )
}

/// Execute the batch subcommand.
fn run_batch(config_path: Option<&Path>, args: BatchArgs) -> Result<(), DetbatchError> {
    let mut config = load_config(config_path, &args.pipeline, None)?;
    if let Some(workers) = args.workers {
        config.batch.workers = workers;
    }
    if args.fail_fast {
        config.batch.fail_fast = true;
    }

    let inference = build_inference(&config)?;
    let decoder = ImageCrateDecoder;

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!("could not install Ctrl-C handler: {err}");
    }

    let mut processor = BatchProcessor::new(inference.as_ref(), &decoder, config.batch_options()?)
        .with_cancel_token(cancel);
    if args.progress {
        processor = processor.on_progress(|p| {
            eprintln!("[{}/{}] {}", p.completed, p.total, p.entry);
        });
    }

    let report = processor.process_archive_file(&args.input, &args.output)?;

    match args.report {
        ReportFormat::Json => {
            let json =
                serde_json::to_string_pretty(&report).map_err(DetbatchError::ReportSerialize)?;
            println!("{json}");
        }
        ReportFormat::Text => {
            println!("Batch {} -> {}:", args.input.display(), args.output.display());
            print!("{report}");
        }
    }

    if report.is_complete() {
        Ok(())
    } else {
        Err(DetbatchError::BatchIncomplete {
            report: Box::new(report),
        })
    }
}

/// Execute the compare subcommand.
fn run_compare(config_path: Option<&Path>, args: CompareArgs) -> Result<(), DetbatchError> {
    let config = load_config(config_path, &args.pipeline, Some(&args.render))?;
    let labels = read_label_file(&args.labels)?;
    let inference = build_inference(&config)?;
    let annotator = build_annotator(&config)?;
    let image = load_image(&args.image)?;

    let pipeline = Pipeline::new(inference.as_ref(), config.filter_options()?);
    let comparison = compare::compare(
        &image,
        &labels,
        &pipeline,
        &annotator,
        config.show_confidence,
    )?;

    fs::create_dir_all(&args.output_dir).map_err(DetbatchError::Io)?;
    let stem = file_stem(&args.image);
    write_outputs(&args.output_dir, &stem, "_truth", &comparison.ground_truth)?;
    write_outputs(&args.output_dir, &stem, "_inferred", &comparison.inferred)?;
    Ok(())
}

/// Execute the labels subcommand.
fn run_labels(args: LabelsArgs) -> Result<(), DetbatchError> {
    let labels = read_label_file(&args.labels)?;
    let size = imagesize::size(&args.image).map_err(|source| DetbatchError::ImageDimensionRead {
        path: args.image.clone(),
        source,
    })?;
    let target = Resolution::new(size.width as u32, size.height as u32);
    let rescaled = rescale_records(&labels, target);

    match &args.output {
        Some(path) => {
            write_export_csv(path, &rescaled.items)?;
            println!("Wrote {} ({} label(s))", path.display(), rescaled.len());
        }
        None => print!("{}", to_export_csv_string(&rescaled.items)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_argument_parses() {
        assert_eq!(parse_resolution("640x480"), Ok(Resolution::new(640, 480)));
        assert_eq!(parse_resolution("320X320"), Ok(Resolution::new(320, 320)));
        assert!(parse_resolution("640").is_err());
        assert!(parse_resolution("0x640").is_err());
        assert!(parse_resolution("ax640").is_err());
    }

    #[test]
    fn verbose_flags_pick_info_then_debug() {
        assert_eq!(verbosity_directive(0), None);
        assert_eq!(verbosity_directive(1), Some("info"));
        assert_eq!(verbosity_directive(2), Some("debug"));
        assert_eq!(verbosity_directive(5), Some("debug"));
    }

    #[test]
    fn flags_override_config_values() {
        let pipeline = PipelineArgs {
            conf_thres: Some(0.7),
            timeout: Some(0),
            suppression: Some(SuppressionPolicy::PerClass),
            ..Default::default()
        };
        let render = RenderArgs {
            show_confidence: true,
            font: None,
        };
        let config = load_config(None, &pipeline, Some(&render)).expect("config");
        assert_eq!(config.conf_thres, 0.7);
        assert_eq!(config.inference.timeout_secs, None);
        assert_eq!(config.suppression, SuppressionPolicy::PerClass);
        assert!(config.show_confidence);
    }

    #[test]
    fn invalid_override_is_rejected() {
        let pipeline = PipelineArgs {
            iou_thres: Some(2.0),
            ..Default::default()
        };
        let err = load_config(None, &pipeline, None).unwrap_err();
        assert!(matches!(err, DetbatchError::ConfigInvalid { .. }));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
