//! 皮膚病変分類 CLI

use burn::tensor::backend::Backend;
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::{Wgpu, WgpuDevice};
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info};
use skin_lesion_lib::context::{AppContext, ClassificationReport, ClassificationRequest};
use skin_lesion_lib::ml::ClassifierState;
use skin_lesion_lib::model::{load_metadata, print_metadata_info, AppConfig, DeviceType, InferenceConfig};
use skin_lesion_lib::report::{clinical_significance, display_name, PatientDetails};
use std::path::{Path, PathBuf};
use std::process;

/// Dermatoscopic skin lesion classifier (HAM10000)
#[derive(Parser, Debug)]
#[command(name = "skin-lesion")]
#[command(about = "Classify dermatoscopic skin lesion images")]
#[command(version)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train on the HAM10000 dataset and save the model
    Train {
        /// Dataset directory
        #[arg(long, value_name = "DIR")]
        data_dir: Option<PathBuf>,
    },
    /// Classify one image
    Predict {
        /// Image file
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// Dataset directory (trains first when the dataset is present)
        #[arg(long, value_name = "DIR")]
        data_dir: Option<PathBuf>,

        /// Skip training and use the saved or demo model
        #[arg(long)]
        demo: bool,

        /// Write an HTML report
        #[arg(long, value_name = "OUT.html")]
        report: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,

        #[arg(long)]
        patient_name: Option<String>,

        #[arg(long)]
        patient_id: Option<String>,

        #[arg(long)]
        patient_age: Option<u32>,
    },
    /// Show the metadata of a saved model
    Info {
        /// Model file (tar.gz)
        #[arg(value_name = "ARTIFACT")]
        artifact: Option<PathBuf>,
    },
}

/// Output format options
#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable text format
    Text,
    /// JSON format
    Json,
}

fn main() {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => AppConfig::load_or_default_from(path),
        None => AppConfig::load_or_default(),
    };
    if cli.verbose {
        config.display();
    }

    let result = match config.device_type {
        DeviceType::Cpu => run::<NdArray<f32>>(cli.command, config, NdArrayDevice::Cpu),
        DeviceType::Wgpu => run::<Wgpu>(cli.command, config, WgpuDevice::default()),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}

fn run<B: Backend>(command: Command, mut config: AppConfig, device: B::Device) -> anyhow::Result<()> {
    match command {
        Command::Train { data_dir } => {
            if let Some(dir) = data_dir {
                config.data = config.data.with_data_dir(dir);
            }
            info!("使用デバイス: {}", config.device_type);

            let context = AppContext::<B>::new(config, true, &device);
            if context.classifier.state() != ClassifierState::Trained {
                anyhow::bail!(
                    "学習できませんでした（{}）。データセットの配置を確認してください",
                    context.classifier.state()
                );
            }
            println!("学習完了: {}", context.config.model.artifact_path.display());
            Ok(())
        }
        Command::Predict {
            image,
            data_dir,
            demo,
            report,
            format,
            patient_name,
            patient_id,
            patient_age,
        } => {
            if let Some(dir) = data_dir {
                config.data = config.data.with_data_dir(dir);
            }
            let patient = PatientDetails {
                name: patient_name,
                id: patient_id,
                age: patient_age,
            };
            let request = ClassificationRequest::from_path(&image, patient)?;

            let context = AppContext::<B>::new(config, !demo, &device);
            let result = context.classify(request)?;

            match format {
                OutputFormat::Text => print_text(&result, context.classifier.state()),
                OutputFormat::Json => print_json(&result)?,
            }

            if let Some(path) = report {
                std::fs::write(&path, result.to_html())?;
                info!("レポートを保存しました: {}", path.display());
            }
            Ok(())
        }
        Command::Info { artifact } => {
            let path = artifact.unwrap_or_else(|| config.model.artifact_path.clone());
            show_info(&path)
        }
    }
}

fn print_text(result: &ClassificationReport, state: ClassifierState) {
    let assessment = &result.assessment;

    println!("=== {} ===", result.file_name);
    println!("モデル: {}", state);
    println!(
        "画像: {} ({:.2} MB, {})",
        result.image.dimensions(),
        result.image.file_size_mb(),
        result.image.quality
    );
    println!();
    println!("診断: {} ({:.1}%)", assessment.display_name(), assessment.confidence * 100.0);
    println!("リスク: {}", assessment.level);
    println!("推奨: {}", assessment.recommendation);
    println!();

    for (code, score) in result.prediction.ranked() {
        println!(
            "  {:<24} {:>6.1}%  {}",
            display_name(code),
            score * 100.0,
            clinical_significance(code)
        );
    }
}

fn print_json(result: &ClassificationReport) -> anyhow::Result<()> {
    let output = serde_json::json!({
        "file_name": result.file_name,
        "scores": result.prediction.scores(),
        "assessment": result.assessment,
        "image": result.image,
        "generated_at": result.generated_at.to_rfc3339(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn show_info(path: &Path) -> anyhow::Result<()> {
    let metadata = load_metadata(path)?;
    print_metadata_info(&metadata);
    InferenceConfig::from_metadata(&metadata).print_info();

    println!("{}", serde_json::to_string_pretty(&metadata)?);
    Ok(())
}
