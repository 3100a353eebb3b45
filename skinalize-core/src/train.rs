use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder, Dataset},
    lr_scheduler::LrScheduler,
    optim::{decay::WeightDecayConfig, AdamConfig},
    prelude::*,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
    train::{
        logger::{MetricLogger, NumericEntry},
        metric::{
            store::{Aggregate, Direction, Split},
            AccuracyMetric, LossMetric, MetricEntry,
        },
        LearnerBuilder, MetricEarlyStoppingStrategy, StoppingCondition,
    },
    LearningRate,
};
use std::{
    collections::BTreeMap,
    fs::File,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crate::{
    data::{ImageBatch, ImageBatcher, ImageDataSet},
    model::{Model, ModelConfig},
    plot::{self, EpochMetrics, PhaseHistory, TrainingHistory},
};
use anyhow::{Context, Result};

/// The backbone's projection layer: weight + bias, trained in both phases.
const PROJECTION_TENSORS: usize = 2;

#[derive(Config)]
pub struct TrainingConfig {
    model: ModelConfig,
    optimizer: AdamConfig,
    train_set: PathBuf,
    valid_set: PathBuf,
    model_out: PathBuf,
    results_dir: PathBuf,
    #[config(default = 10)]
    num_epochs: usize,
    #[config(default = 15)]
    finetune_epochs: usize,
    #[config(default = 32)]
    batch_size: usize,
    #[config(default = 1)]
    num_workers: usize,
    #[config(default = 42)]
    seed: u64,
    #[config(default = 1.0e-3)]
    learning_rate: f64,
    #[config(default = 1.0e-4)]
    finetune_learning_rate: f64,
    #[config(default = 7)]
    patience: usize,
    #[config(default = 5)]
    decay_epoch: usize,
    #[config(default = 0.5)]
    decay_factor: f64,
    /// Share of backbone parameter tensors, counted from the input side, that
    /// stays frozen during fine-tuning.
    #[config(default = 0.25)]
    frozen_fraction: f64,
    #[config(default = 0.01)]
    weight_decay: f32,
}

fn create_artifact_dir(artifact_dir: &Path) {
    // Remove existing artifacts before to get an accurate learner summary
    std::fs::remove_dir_all(artifact_dir).ok();
    std::fs::create_dir_all(artifact_dir).ok();
}

pub fn train<B: AutodiffBackend>(
    artifact_dir: PathBuf,
    config: TrainingConfig,
    device: B::Device,
) -> Result<()> {
    create_artifact_dir(&artifact_dir);

    B::seed(config.seed);

    config
        .save(artifact_dir.join("train_config.json"))
        .expect("Config should be saved successfully");

    let train_set = ImageDataSet::train(&config.train_set)?;
    let iters_per_epoch = train_set.len().div_ceil(config.batch_size).max(1);

    let batcher_train = ImageBatcher::<B>::new(device.clone());
    let batcher_valid = ImageBatcher::<B::InnerBackend>::new(device.clone());

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(train_set);

    let dataloader_valid = DataLoaderBuilder::new(batcher_valid)
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(ImageDataSet::valid(&config.valid_set)?);

    let mut history = TrainingHistory::default();

    let model = config.model.init::<B>(&device)?;
    let backbone_tensors = model.num_backbone_tensors();
    tracing::info!(
        params = model.num_params(),
        backbone_tensors,
        "model initialized"
    );

    // Phase 1: everything up to the projection layer stays frozen.
    let model = model.freeze_backbone_below(backbone_tensors - PROJECTION_TENSORS);
    let model = fit_phase(
        &artifact_dir.join("head"),
        "head",
        model,
        dataloader_train.clone(),
        dataloader_valid.clone(),
        config.num_epochs,
        config.learning_rate,
        iters_per_epoch,
        &config,
        &mut history,
        device.clone(),
    );

    // Phase 2: reload into a pristine module so everything past the earliest
    // layers becomes trainable again, then fine-tune at a lower rate.
    let frozen = (backbone_tensors as f64 * config.frozen_fraction) as usize;
    let model = config
        .model
        .clone()
        .with_pretrained(false)
        .init::<B>(&device)?
        .load_record(model.into_record())
        .freeze_backbone_below(frozen);
    let model = fit_phase(
        &artifact_dir.join("finetune"),
        "finetune",
        model,
        dataloader_train,
        dataloader_valid,
        config.finetune_epochs,
        config.finetune_learning_rate,
        iters_per_epoch,
        &config,
        &mut history,
        device,
    );

    if let Some(parent) = config.model_out.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    model
        .save_file(&config.model_out, &CompactRecorder::new())
        .expect("Trained model should be saved successfully");
    tracing::info!(path = %config.model_out.display(), "final weights saved");

    std::fs::create_dir_all(&config.results_dir)
        .with_context(|| format!("creating {}", config.results_dir.display()))?;
    serde_json::to_writer_pretty(
        File::create(config.results_dir.join("history.json"))?,
        &history,
    )?;
    let (accuracy_plot, loss_plot) = plot::save_curves(&history, &config.results_dir)?;
    tracing::info!(
        accuracy = %accuracy_plot.display(),
        loss = %loss_plot.display(),
        "training curves saved"
    );

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn fit_phase<B: AutodiffBackend>(
    artifact_dir: &Path,
    phase: &str,
    model: Model<B>,
    dataloader_train: Arc<dyn DataLoader<ImageBatch<B>>>,
    dataloader_valid: Arc<dyn DataLoader<ImageBatch<B::InnerBackend>>>,
    num_epochs: usize,
    learning_rate: f64,
    iters_per_epoch: usize,
    config: &TrainingConfig,
    history: &mut TrainingHistory,
    device: B::Device,
) -> Model<B> {
    if num_epochs == 0 {
        // weights must leave a 0-epoch phase exactly as they entered it
        tracing::warn!(phase, "0 epochs requested, skipping phase");
        return model;
    }

    let train_metrics = SharedMetrics::default();
    let valid_metrics = SharedMetrics::default();

    let learner = LearnerBuilder::new(artifact_dir)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .metric_loggers(
            HistoryLogger::new(train_metrics.clone()),
            HistoryLogger::new(valid_metrics.clone()),
        )
        .early_stopping(MetricEarlyStoppingStrategy::new::<LossMetric<B>>(
            Aggregate::Mean,
            Direction::Lowest,
            Split::Valid,
            StoppingCondition::NoImprovementSince {
                n_epochs: config.patience,
            },
        ))
        .with_file_checkpointer(CompactRecorder::new())
        .devices(vec![device])
        .num_epochs(num_epochs)
        .summary()
        .build(
            model,
            config
                .optimizer
                .clone()
                .with_weight_decay(Some(WeightDecayConfig::new(config.weight_decay)))
                .init(),
            StepLrSchedulerConfig::new(learning_rate, iters_per_epoch)
                .with_decay_epoch(config.decay_epoch)
                .with_decay_factor(config.decay_factor)
                .init(),
        );

    let model = learner.fit(dataloader_train, dataloader_valid);
    history
        .phases
        .push(collect_phase(phase, &train_metrics, &valid_metrics));
    model
}

#[derive(Config)]
pub struct StepLrSchedulerConfig {
    initial_lr: f64,
    iters_per_epoch: usize,
    #[config(default = 5)]
    decay_epoch: usize,
    #[config(default = 0.5)]
    decay_factor: f64,
}

impl StepLrSchedulerConfig {
    pub fn init(&self) -> StepLrScheduler {
        StepLrScheduler {
            initial_lr: self.initial_lr,
            iters_per_epoch: self.iters_per_epoch.max(1),
            decay_epoch: self.decay_epoch,
            decay_factor: self.decay_factor,
            iteration: 0,
        }
    }
}

/// Keeps the rate constant until `decay_epoch`, then multiplies it by
/// `decay_factor` once per epoch, compounding.
#[derive(Clone, Debug)]
pub struct StepLrScheduler {
    initial_lr: f64,
    iters_per_epoch: usize,
    decay_epoch: usize,
    decay_factor: f64,
    iteration: usize,
}

impl LrScheduler for StepLrScheduler {
    type Record<B: Backend> = usize;

    fn step(&mut self) -> LearningRate {
        let epoch = self.iteration / self.iters_per_epoch;
        self.iteration += 1;
        let decays = (epoch + 1).saturating_sub(self.decay_epoch);
        self.initial_lr * self.decay_factor.powi(decays as i32)
    }

    fn to_record<B: Backend>(&self) -> Self::Record<B> {
        self.iteration
    }

    fn load_record<B: Backend>(mut self, record: Self::Record<B>) -> Self {
        self.iteration = record;
        self
    }
}

/// Per-epoch numeric entries for one split, shared with the learner's metric
/// loggers so the curves survive the fit.
#[derive(Default, Clone)]
struct SharedMetrics(Arc<Mutex<BTreeMap<String, Vec<Vec<NumericEntry>>>>>);

impl SharedMetrics {
    fn epoch_mean(&self, name: &str, epoch: usize) -> Option<f64> {
        let store = self.0.lock().unwrap();
        let entries = store.get(name)?.get(epoch.checked_sub(1)?)?;
        mean(entries)
    }

    fn num_epochs(&self) -> usize {
        let store = self.0.lock().unwrap();
        store.values().map(|epochs| epochs.len()).max().unwrap_or(0)
    }
}

fn mean(entries: &[NumericEntry]) -> Option<f64> {
    let (sum, count) = entries.iter().fold((0.0, 0usize), |(sum, count), e| match e {
        NumericEntry::Value(v) => (sum + v, count + 1),
        NumericEntry::Aggregated(v, n) => (sum + v * *n as f64, count + n),
    });
    (count > 0).then(|| sum / count as f64)
}

struct HistoryLogger {
    store: SharedMetrics,
    current: BTreeMap<String, Vec<NumericEntry>>,
}

impl HistoryLogger {
    fn new(store: SharedMetrics) -> Self {
        Self {
            store,
            current: BTreeMap::new(),
        }
    }
}

impl MetricLogger for HistoryLogger {
    fn log(&mut self, item: &MetricEntry) {
        // non-numeric metrics serialize to something else and are skipped
        if let Ok(entry) = NumericEntry::deserialize(&item.serialize) {
            self.current
                .entry(item.name.clone())
                .or_default()
                .push(entry);
        }
    }

    fn end_epoch(&mut self, epoch: usize) {
        let mut store = self.store.0.lock().unwrap();
        for (name, entries) in std::mem::take(&mut self.current) {
            let epochs = store.entry(name).or_default();
            while epochs.len() < epoch {
                epochs.push(Vec::new());
            }
            epochs[epoch - 1] = entries;
        }
    }

    fn read_numeric(&mut self, name: &str, epoch: usize) -> Result<Vec<NumericEntry>, String> {
        let store = self.store.0.lock().unwrap();
        epoch
            .checked_sub(1)
            .and_then(|index| store.get(name)?.get(index))
            .cloned()
            .ok_or_else(|| format!("No numeric entries for metric {name} at epoch {epoch}"))
    }
}

fn collect_phase(name: &str, train: &SharedMetrics, valid: &SharedMetrics) -> PhaseHistory {
    let num_epochs = train.num_epochs().max(valid.num_epochs());
    let epochs = (1..=num_epochs)
        .map(|epoch| EpochMetrics {
            epoch,
            train_loss: train.epoch_mean("Loss", epoch).unwrap_or_default(),
            train_accuracy: train.epoch_mean("Accuracy", epoch).unwrap_or_default(),
            valid_loss: valid.epoch_mean("Loss", epoch).unwrap_or_default(),
            valid_accuracy: valid.epoch_mean("Accuracy", epoch).unwrap_or_default(),
        })
        .collect();
    PhaseHistory {
        name: name.to_string(),
        epochs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_is_constant_before_the_decay_epoch() {
        let mut scheduler = StepLrSchedulerConfig::new(1.0e-3, 1).init();
        for _ in 0..5 {
            assert_eq!(scheduler.step(), 1.0e-3);
        }
        assert_eq!(scheduler.step(), 5.0e-4);
    }

    #[test]
    fn rate_halves_every_epoch_past_the_decay_epoch() {
        let mut scheduler = StepLrSchedulerConfig::new(1.0, 2)
            .with_decay_epoch(1)
            .init();
        let rates = (0..6).map(|_| scheduler.step()).collect::<Vec<_>>();
        assert_eq!(rates, vec![1.0, 1.0, 0.5, 0.5, 0.25, 0.25]);
    }

    #[test]
    fn decay_factor_is_configurable() {
        let mut scheduler = StepLrSchedulerConfig::new(1.0, 1)
            .with_decay_epoch(1)
            .with_decay_factor(0.1)
            .init();
        assert_eq!(scheduler.step(), 1.0);
        assert_eq!(scheduler.step(), 0.1);
        assert!((scheduler.step() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn shared_metrics_aggregate_epoch_means() {
        let metrics = SharedMetrics::default();
        let mut logger = HistoryLogger::new(metrics.clone());
        logger.log(&MetricEntry::new(
            "Loss".to_string(),
            "2".to_string(),
            NumericEntry::Value(2.0).serialize(),
        ));
        logger.log(&MetricEntry::new(
            "Loss".to_string(),
            "4".to_string(),
            NumericEntry::Value(4.0).serialize(),
        ));
        logger.end_epoch(1);
        assert_eq!(metrics.epoch_mean("Loss", 1), Some(3.0));
        assert_eq!(metrics.num_epochs(), 1);
        assert!(logger.read_numeric("Loss", 1).is_ok());
        assert!(logger.read_numeric("Loss", 2).is_err());
    }

    #[test]
    fn training_defaults_follow_the_two_phase_procedure() {
        let config = TrainingConfig::new(
            ModelConfig::new(crate::model::BackboneType::Layer18),
            AdamConfig::new(),
            PathBuf::from("dataset/train"),
            PathBuf::from("dataset/valid"),
            PathBuf::from("models/skin_classifier"),
            PathBuf::from("results"),
        );
        assert_eq!(config.num_epochs, 10);
        assert_eq!(config.finetune_epochs, 15);
        assert_eq!(config.patience, 7);
        assert_eq!(config.decay_epoch, 5);
        assert_eq!(config.decay_factor, 0.5);
    }
}
