//! rcam CLI: Relevance-CAM explanations and predictions for chest X-rays.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use rcam_core::{Seed, TappableClassifier};
use rcam_data::{preprocess, read_image_list, write_bbox_list, ChestXrayDataset, CLASS_NAMES};
use rcam_explain::{CutoffPolicy, ExplainConfig, Explainer, RelevanceRule};
use rcam_models::{load_pytorch_weights, ChexNet, DenseNetConfig, DenseStage, ModelCheckpoint};

/// Backend for explanations (gradients required).
type ExplainBackend = Autodiff<NdArray>;
/// Backend for plain inference.
type InferBackend = NdArray;

#[derive(Parser)]
#[command(name = "rcam")]
#[command(author, version)]
#[command(about = "Relevance-CAM explanations for a DenseNet-121 chest X-ray classifier")]
#[command(long_about = "rcam: class-discriminative heatmaps for CheXNet predictions.

EXAMPLES:
  # Explain the top prediction at the last dense block
  rcam explain images/00000001_000.png --checkpoint chexnet.mpk

  # Explain a given pathology at an earlier stage with Grad-CAM
  rcam explain images/00000001_000.png --class Effusion --stage denseblock3 --rule grad-cam

  # Use ground-truth labels to pick the class
  rcam explain images/00000001_000.png --labels labels/bbox_list.txt

  # Explain every image of a list with its labelled class
  rcam explain-list --data-dir images --image-list labels/bbox_list.txt --checkpoint chexnet.safetensors

  # Ten-crop averaged probabilities
  rcam predict images/00000001_000.png --checkpoint chexnet.mpk

  # Convert the bounding-box CSV into an image list
  rcam bbox-list BBox_List_2017.csv labels/bbox_list.txt

RULES:
  relevance-cam  - pooled activation x gradient, contrastive seed [default]
  grad-cam       - pooled gradients
  grad-cam++     - weighted positive gradients")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute and render a relevance map for one image
    Explain {
        /// Input radiograph (PNG or JPEG)
        image: PathBuf,

        /// Model weights: burn record (.mpk) or PyTorch export (.safetensors)
        #[arg(long, value_name = "FILE")]
        checkpoint: Option<PathBuf>,

        /// JSON file with explanation settings
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Stage to tap: denseblock1..denseblock4
        #[arg(long, value_name = "STAGE")]
        stage: Option<String>,

        /// Class to explain, by index or name
        #[arg(long, value_name = "CLASS")]
        class: Option<String>,

        /// Image list used to look up the ground-truth label
        #[arg(long, value_name = "FILE")]
        labels: Option<PathBuf>,

        /// Relevance rule: relevance-cam, grad-cam, grad-cam++
        #[arg(long, value_name = "RULE")]
        rule: Option<String>,

        /// Mask cutoff: a fraction of the maximum, or "mean+std"
        #[arg(long, value_name = "CUTOFF")]
        cutoff: Option<String>,

        /// Output directory for images and config.json
        #[arg(long, default_value = "./results", value_name = "DIR")]
        output: PathBuf,

        /// Seed for random weights when no checkpoint is found
        #[arg(long, default_value = "42", value_name = "SEED")]
        seed: u64,
    },
    /// Explain every image of an image list, one panel per image
    ExplainList {
        /// Directory holding the images
        #[arg(long, value_name = "DIR")]
        data_dir: PathBuf,

        /// Image list: `<image> <label> ...` per line
        #[arg(long, value_name = "FILE")]
        image_list: PathBuf,

        /// Model weights: burn record (.mpk) or PyTorch export (.safetensors)
        #[arg(long, value_name = "FILE")]
        checkpoint: Option<PathBuf>,

        /// JSON file with explanation settings
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Stage to tap: denseblock1..denseblock4
        #[arg(long, value_name = "STAGE")]
        stage: Option<String>,

        /// Relevance rule: relevance-cam, grad-cam, grad-cam++
        #[arg(long, value_name = "RULE")]
        rule: Option<String>,

        /// Mask cutoff: a fraction of the maximum, or "mean+std"
        #[arg(long, value_name = "CUTOFF")]
        cutoff: Option<String>,

        /// Output directory for panels and config.json
        #[arg(long, default_value = "./results", value_name = "DIR")]
        output: PathBuf,

        /// Seed for random weights when no checkpoint is found
        #[arg(long, default_value = "42", value_name = "SEED")]
        seed: u64,
    },
    /// Print class probabilities for one image
    Predict {
        /// Input radiograph (PNG or JPEG)
        image: PathBuf,

        /// Model weights: burn record (.mpk) or PyTorch export (.safetensors)
        #[arg(long, value_name = "FILE")]
        checkpoint: Option<PathBuf>,

        /// Use a single 224x224 view instead of ten crops
        #[arg(long, default_value = "false")]
        single: bool,

        /// Seed for random weights when no checkpoint is found
        #[arg(long, default_value = "42", value_name = "SEED")]
        seed: u64,
    },
    /// List the stages that can be tapped
    Stages,
    /// Convert the bounding-box CSV into an image list
    BboxList {
        /// BBox_List_2017.csv
        csv: PathBuf,

        /// Output image list
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::filter::LevelFilter::from_level(log_level))
        .init();

    match cli.command {
        Commands::Explain {
            image,
            checkpoint,
            config,
            stage,
            class,
            labels,
            rule,
            cutoff,
            output,
            seed,
        } => {
            let config = build_config(config, stage, class, rule, cutoff)?;
            handle_explain(image, checkpoint, config, labels, output, seed)
        }
        Commands::ExplainList {
            data_dir,
            image_list,
            checkpoint,
            config,
            stage,
            rule,
            cutoff,
            output,
            seed,
        } => {
            let config = build_config(config, stage, None, rule, cutoff)?;
            handle_explain_list(data_dir, image_list, checkpoint, config, output, seed)
        }
        Commands::Predict {
            image,
            checkpoint,
            single,
            seed,
        } => handle_predict(image, checkpoint, single, seed),
        Commands::Stages => handle_stages(),
        Commands::BboxList { csv, output } => {
            let written = write_bbox_list(&csv, &output)
                .with_context(|| format!("Failed to convert {}", csv.display()))?;
            println!("Wrote {} entries to {}", written, output.display());
            Ok(())
        }
    }
}

/// File settings first, then command-line overrides.
fn build_config(
    path: Option<PathBuf>,
    stage: Option<String>,
    class: Option<String>,
    rule: Option<String>,
    cutoff: Option<String>,
) -> Result<ExplainConfig> {
    let mut config = match path {
        Some(path) => ExplainConfig::load(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ExplainConfig::default(),
    };

    if let Some(stage) = stage {
        config.stage = stage.parse::<DenseStage>()?.name().to_string();
    }
    if let Some(class) = class {
        config.class = Some(parse_class(&class)?);
    }
    if let Some(rule) = rule {
        config.rule = rule.parse::<RelevanceRule>()?;
    }
    if let Some(cutoff) = cutoff {
        config.cutoff = parse_cutoff(&cutoff)?;
    }
    Ok(config)
}

fn parse_class(value: &str) -> Result<usize> {
    if let Ok(idx) = value.parse::<usize>() {
        if idx >= CLASS_NAMES.len() {
            bail!("Class index {} out of range (0..{})", idx, CLASS_NAMES.len());
        }
        return Ok(idx);
    }
    rcam_data::class_index(value).with_context(|| {
        format!(
            "Unknown class '{}'. Expected an index or one of: {}",
            value,
            CLASS_NAMES.join(", ")
        )
    })
}

fn parse_cutoff(value: &str) -> Result<CutoffPolicy> {
    match value.to_ascii_lowercase().as_str() {
        "mean+std" | "mean-plus-std" | "meanstd" => Ok(CutoffPolicy::MeanPlusStd),
        other => {
            let fraction: f32 = other
                .parse()
                .with_context(|| format!("Invalid cutoff '{}'", value))?;
            if !(0.0..=1.0).contains(&fraction) {
                bail!("Cutoff fraction must be within [0, 1], got {}", fraction);
            }
            Ok(CutoffPolicy::FractionOfMax(fraction))
        }
    }
}

/// CheXNet from `checkpoint`, or seeded random weights when there is none.
fn load_model<B: Backend>(checkpoint: Option<&Path>, seed: u64, device: &B::Device) -> Result<ChexNet<B>> {
    Seed::new(seed).seed_backend::<B>();
    let model = DenseNetConfig::default().init::<B>(device);

    match checkpoint {
        Some(path) if path.exists() => {
            println!("=> loading checkpoint {}", path.display());
            let loaded = if path.extension().is_some_and(|ext| ext == "safetensors") {
                load_pytorch_weights(model, path, device)
            } else {
                model.load_checkpoint(path, device)
            };
            loaded.with_context(|| format!("Failed to load checkpoint {}", path.display()))
        }
        Some(path) => {
            tracing::warn!("No checkpoint found at {:?}; using random weights", path);
            Ok(model)
        }
        None => {
            tracing::warn!("No checkpoint given; using random weights (seed {})", seed);
            Ok(model)
        }
    }
}

fn handle_explain(
    image: PathBuf,
    checkpoint: Option<PathBuf>,
    config: ExplainConfig,
    labels: Option<PathBuf>,
    output: PathBuf,
    seed: u64,
) -> Result<()> {
    let device = Default::default();
    let model = load_model::<ExplainBackend>(checkpoint.as_deref(), seed, &device)?;

    let img = preprocess::load_rgb(&image)
        .with_context(|| format!("Failed to read image {}", image.display()))?;
    let (input, _) = preprocess::prepare_single::<ExplainBackend>(&img, preprocess::INPUT_SIZE, &device)?;
    let base = preprocess::resize_exact(
        &img,
        config.output_width as u32,
        config.output_height as u32,
    );

    let label = match labels {
        Some(list) => lookup_label(&list, &image)?,
        None => None,
    };

    let explainer = Explainer::new(&model, config.clone())?;
    let explanation = explainer.explain(input, label.as_deref())?;

    std::fs::create_dir_all(&output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let class_name = CLASS_NAMES[explanation.target_class];

    let files = [
        ("heatmap", explanation.heatmap_image()),
        ("overlay", explanation.overlay(&base, config.alpha)?),
        ("mask", explanation.masked(&base)?),
        ("panel", explanation.panel(&base, config.alpha)?),
    ];
    for (kind, rendered) in &files {
        let path = output.join(format!("{}_{}_{}.png", stem, class_name, kind));
        rendered
            .save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::debug!("Wrote {:?}", path);
    }

    let config_path = output.join("config.json");
    config
        .save(&config_path)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!("Image:        {}", image.display());
    println!("Stage:        {}", explanation.stage);
    println!("Rule:         {}", explanation.rule);
    println!(
        "Target class: {} ({}), p = {:.4}",
        class_name,
        explanation.target_class,
        explanation.target_probability()
    );
    println!(
        "Mask:         {} / {} pixels >= {:.4}",
        explanation.mask.iter().filter(|m| **m).count(),
        explanation.mask.len(),
        explanation.cutoff
    );
    println!("Output:       {}", output.display());
    Ok(())
}

/// Summary of one explained list entry.
#[derive(Debug, Clone)]
struct ListResult {
    image: String,
    target_class: usize,
    probabilities: Vec<f32>,
    panel: PathBuf,
}

fn handle_explain_list(
    data_dir: PathBuf,
    image_list: PathBuf,
    checkpoint: Option<PathBuf>,
    config: ExplainConfig,
    output: PathBuf,
    seed: u64,
) -> Result<()> {
    let device = Default::default();
    let model = load_model::<ExplainBackend>(checkpoint.as_deref(), seed, &device)?;
    let dataset = ChestXrayDataset::new(&data_dir, &image_list)
        .with_context(|| format!("Failed to read image list {}", image_list.display()))?;
    println!("=> explaining {} images from {}", dataset.len(), image_list.display());

    let explainer = Explainer::new(&model, config)?;
    let results = explain_dataset(&explainer, &dataset, &output, &device)?;

    println!();
    println!("{:<24} {:<20} {:>8}  Panel", "Image", "Class", "p");
    println!("─────────────────────────────────────────────────────────────────");
    for result in &results {
        println!(
            "{:<24} {:<20} {:>8.4}  {}",
            result.image,
            class_label(result.target_class),
            result.probabilities[result.target_class],
            result.panel.display()
        );
    }
    Ok(())
}

/// Explain every entry of `dataset` with its label, writing one panel each.
///
/// The tap is installed once, by the caller's `explainer`, for the whole run.
fn explain_dataset<B, M>(
    explainer: &Explainer<'_, B, M>,
    dataset: &ChestXrayDataset,
    output: &Path,
    device: &B::Device,
) -> Result<Vec<ListResult>>
where
    B: AutodiffBackend,
    M: TappableClassifier<B> + ?Sized,
{
    std::fs::create_dir_all(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let config = explainer.config();

    let mut results = Vec::with_capacity(dataset.len());
    for (idx, entry) in dataset.iter().enumerate() {
        let img = dataset
            .load_image(idx)
            .with_context(|| format!("Failed to read image {}", dataset.image_path(entry).display()))?;
        let (input, _) = preprocess::prepare_single::<B>(&img, preprocess::INPUT_SIZE, device)?;
        let base = preprocess::resize_exact(
            &img,
            config.output_width as u32,
            config.output_height as u32,
        );

        let explanation = explainer
            .explain(input, Some(entry.labels.as_slice()))
            .with_context(|| format!("Failed to explain {}", entry.image))?;

        let stem = Path::new(&entry.image)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("image{idx}"));
        let panel = output.join(format!(
            "{}_{}_panel.png",
            stem,
            class_label(explanation.target_class)
        ));
        explanation
            .panel(&base, config.alpha)?
            .save(&panel)
            .with_context(|| format!("Failed to write {}", panel.display()))?;
        tracing::debug!("Wrote {:?}", panel);

        results.push(ListResult {
            image: entry.image.clone(),
            target_class: explanation.target_class,
            probabilities: explanation.probabilities,
            panel,
        });
    }

    let config_path = output.join("config.json");
    config
        .save(&config_path)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    Ok(results)
}

fn class_label(index: usize) -> String {
    rcam_data::class_name(index)
        .map(str::to_string)
        .unwrap_or_else(|| format!("class{index}"))
}

/// Ground-truth label of `image` from an image list, matched by file name.
fn lookup_label(list: &Path, image: &Path) -> Result<Option<Vec<f32>>> {
    let entries = read_image_list(list)
        .with_context(|| format!("Failed to read image list {}", list.display()))?;
    let name = image
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let label = entries
        .into_iter()
        .find(|entry| entry.image == name)
        .map(|entry| entry.labels);
    if label.is_none() {
        tracing::warn!("{} not found in {:?}; using the top prediction", name, list);
    }
    Ok(label)
}

fn handle_predict(image: PathBuf, checkpoint: Option<PathBuf>, single: bool, seed: u64) -> Result<()> {
    let device = Default::default();
    let model = load_model::<InferBackend>(checkpoint.as_deref(), seed, &device)?;

    let img = preprocess::load_rgb(&image)
        .with_context(|| format!("Failed to read image {}", image.display()))?;

    let probs = if single {
        let (input, _) = preprocess::prepare_single::<InferBackend>(&img, preprocess::INPUT_SIZE, &device)?;
        model.forward(input)
    } else {
        let crops = preprocess::prepare_ten_crop::<InferBackend>(
            &img,
            preprocess::RESIZE_SIZE,
            preprocess::INPUT_SIZE,
            &device,
        )?;
        model.forward_crops(crops)
    };

    let probs = probs
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("Failed to read probabilities: {:?}", e))?;

    let mut ranked: Vec<(usize, f32)> = probs.into_iter().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    println!("Predictions for {}:", image.display());
    println!("─────────────────────────────────────────");
    for (idx, p) in ranked {
        println!("  {:>2}  {:<20} {:.4}", idx, CLASS_NAMES[idx], p);
    }
    Ok(())
}

fn handle_stages() -> Result<()> {
    let channels = DenseNetConfig::default().stage_channels();
    println!("Tappable stages (DenseNet-121, 224x224 input):");
    println!("─────────────────────────────────────────");
    for (stage, (channels, grid)) in DenseStage::ALL
        .iter()
        .zip(channels.iter().zip([56, 28, 14, 7]))
    {
        println!("  {:<12} {:>5} channels  {}x{}", stage.name(), channels, grid, grid);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_class() {
        assert_eq!(parse_class("2").unwrap(), 2);
        assert_eq!(parse_class("Cardiomegaly").unwrap(), 1);
        assert!(parse_class("14").is_err());
        assert!(parse_class("Fracture").is_err());
    }

    #[test]
    fn test_parse_cutoff() {
        assert_eq!(parse_cutoff("mean+std").unwrap(), CutoffPolicy::MeanPlusStd);
        assert_eq!(parse_cutoff("0.3").unwrap(), CutoffPolicy::FractionOfMax(0.3));
        assert!(parse_cutoff("1.5").is_err());
        assert!(parse_cutoff("half").is_err());
    }

    #[test]
    fn test_build_config_overrides() {
        let config = build_config(
            None,
            Some("DenseBlock3".to_string()),
            Some("Effusion".to_string()),
            Some("grad-cam".to_string()),
            None,
        )
        .unwrap();

        assert_eq!(config.stage, "denseblock3");
        assert_eq!(config.class, Some(2));
        assert_eq!(config.rule, RelevanceRule::GradCam);
        assert_eq!(config.cutoff, CutoffPolicy::default());
        assert!(build_config(None, Some("layer4".to_string()), None, None, None).is_err());
    }

    #[test]
    fn test_explain_dataset_uses_labels() {
        let dir = std::env::temp_dir().join(format!("rcam_list_run_{}", std::process::id()));
        let images = dir.join("images");
        let output = dir.join("results");
        std::fs::create_dir_all(&images).unwrap();

        for (name, shade) in [("00000001_000.png", 40u8), ("00000002_000.png", 200u8)] {
            let img = image::RgbImage::from_fn(96, 96, |x, y| {
                image::Rgb([shade, (x * 2) as u8, (y * 2) as u8])
            });
            img.save(images.join(name)).unwrap();
        }
        let list = dir.join("list.txt");
        std::fs::write(&list, "00000001_000.png 0 0 1\n00000002_000.png 0 0 0\n").unwrap();

        let device = Default::default();
        let model: ChexNet<ExplainBackend> =
            DenseNetConfig::new(4, [1, 1, 1, 1], 8, 2, 3).init(&device);
        let config = ExplainConfig::default().with_stage("denseblock2");
        let explainer = Explainer::new(&model, config).unwrap();
        let dataset = ChestXrayDataset::new(&images, &list).unwrap();

        let results = explain_dataset(&explainer, &dataset, &output, &device).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].image, "00000001_000.png");
        assert_eq!(results[0].target_class, 2);
        // A no-finding label falls back to the top prediction.
        let top = rcam_core::argmax(&results[1].probabilities).unwrap();
        assert_eq!(results[1].target_class, top);
        for result in &results {
            assert!(result.panel.exists());
            assert_eq!(image::image_dimensions(&result.panel).unwrap(), (672, 224));
        }
        assert!(output.join("config.json").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_class_label() {
        assert_eq!(class_label(1), "Cardiomegaly");
        assert_eq!(class_label(20), "class20");
    }
}
