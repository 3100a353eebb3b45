use crate::{
    model::{BackboneType, ModelConfig},
    predict::{predict, Output, PredictConfig},
    train::{train, TrainingConfig},
};
use anyhow::Result;
use burn::{backend::Autodiff, optim::AdamConfig};
use clap::{CommandFactory as _, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    #[clap(subcommand)]
    subcmd: SubCmd,
}

#[derive(Debug, Subcommand)]
enum SubCmd {
    /// Train the skin condition classifier on a folder-per-class dataset
    Train {
        /// Backbone type
        #[arg(short, long, default_value = BackboneType::default())]
        model: BackboneType,
        /// Root of the training images (one sub-directory per condition)
        #[arg(short, long, default_value = "dataset/train")]
        train_set: PathBuf,
        /// Root of the validation images (one sub-directory per condition)
        #[arg(short, long, default_value = "dataset/valid")]
        valid_set: PathBuf,
        /// Directory to save artifacts (The directory will be recreated if it exists)
        #[arg(short, long, default_value = "skinalize_artifact")]
        artifact_dir: PathBuf,
        /// Path the final weights are written to
        #[arg(short = 'o', long, default_value = "models/skin_classifier")]
        model_out: PathBuf,
        /// Directory the training curves and history are written to
        #[arg(short, long, default_value = "results")]
        results_dir: PathBuf,
        /// Number of epochs with the backbone frozen
        #[arg(short, long, default_value = "10")]
        num_epochs: usize,
        /// Number of fine-tuning epochs with most of the backbone unfrozen
        #[arg(short, long, default_value = "15")]
        finetune_epochs: usize,
        #[arg(short, long, default_value = "32")]
        batch_size: usize,
        /// Number of workers for data loading
        #[arg(short = 'w', long, default_value = "1")]
        num_workers: usize,
        /// Learning rate for the frozen phase, halved per epoch from the decay epoch on
        #[arg(short, long, default_value = "1.0e-3")]
        learning_rate: f64,
        /// Learning rate for the fine-tuning phase
        #[arg(long, default_value = "1.0e-4")]
        finetune_learning_rate: f64,
        /// Number of epochs without validation-loss improvement before stopping
        #[arg(short, long, default_value = "7")]
        patience: usize,
        /// Random seed for reproducibility
        #[arg(short, long, default_value = "42")]
        seed: u64,
    },
    /// Predict using a classifier checkpoint
    Predict {
        /// Backbone type
        #[arg(short, long, default_value = BackboneType::default())]
        model: BackboneType,
        /// Path to the model checkpoint
        #[arg(short, long, default_value = "models/skin_classifier")]
        checkpoint: PathBuf,
        /// Method to output the predictions
        #[arg(short, long, default_value = "tty")]
        output: Output,
        #[arg(short, long, default_value = "32")]
        batch_size: usize,
        /// Number of workers for data loading
        #[arg(short = 'w', long, default_value = "8")]
        num_workers: usize,
        /// Root of images directory
        input: PathBuf,
    },
    /// generate auto completion script
    GenCompletion {
        /// shell name
        shell: Shell,
    },
}

#[cfg(feature = "tch")]
type MyBackend = burn::backend::LibTorch<f32>;
#[cfg(all(feature = "candle", not(feature = "tch")))]
type MyBackend = burn::backend::Candle<f32>;
#[cfg(all(feature = "ndarray", not(feature = "tch"), not(feature = "candle")))]
type MyBackend = burn::backend::NdArray<f32>;

type MyAutodiffBackend = Autodiff<MyBackend>;

pub fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    #[cfg(all(feature = "tch", target_os = "macos"))]
    let device = burn::backend::libtorch::LibTorchDevice::Mps;
    #[cfg(all(feature = "tch", not(target_os = "macos")))]
    let device = burn::backend::libtorch::LibTorchDevice::Cuda(0);

    #[cfg(all(feature = "candle", not(feature = "tch"), target_os = "macos"))]
    let device = burn::backend::candle::CandleDevice::Metal(0);
    #[cfg(all(feature = "candle", not(feature = "tch"), not(target_os = "macos")))]
    let device = burn::backend::candle::CandleDevice::Cuda(0);

    #[cfg(all(feature = "ndarray", not(feature = "tch"), not(feature = "candle")))]
    let device = burn::backend::ndarray::NdArrayDevice::Cpu;

    let args = Cli::parse();
    match args.subcmd {
        SubCmd::Train {
            model,
            train_set,
            valid_set,
            artifact_dir,
            model_out,
            results_dir,
            num_epochs,
            finetune_epochs,
            batch_size,
            num_workers,
            learning_rate,
            finetune_learning_rate,
            patience,
            seed,
        } => {
            train::<MyAutodiffBackend>(
                artifact_dir,
                TrainingConfig::new(
                    ModelConfig::new(model).with_pretrained(true),
                    AdamConfig::new(),
                    train_set,
                    valid_set,
                    model_out,
                    results_dir,
                )
                .with_num_epochs(num_epochs)
                .with_finetune_epochs(finetune_epochs)
                .with_batch_size(batch_size)
                .with_num_workers(num_workers)
                .with_learning_rate(learning_rate)
                .with_finetune_learning_rate(finetune_learning_rate)
                .with_patience(patience)
                .with_seed(seed),
                device,
            )?;
        }
        SubCmd::Predict {
            model,
            checkpoint,
            output,
            batch_size,
            num_workers,
            input,
        } => predict::<MyBackend>(
            PredictConfig::new(model, checkpoint, input, output)
                .with_batch_size(batch_size)
                .with_num_workers(num_workers),
            device,
        )?,
        SubCmd::GenCompletion { shell } => {
            generate(shell, &mut Cli::command(), "skinalize", &mut std::io::stdout());
        }
    }
    Ok(())
}
