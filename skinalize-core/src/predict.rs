use crate::{
    data::{self, ImageBatcher, ImageDataSet, SIZE},
    model::{BackboneType, Model, ModelConfig, CLASS_NAMES},
};
use anyhow::{Context, Result};
use burn::{
    config::Config,
    data::dataloader::DataLoaderBuilder,
    prelude::*,
    record::{CompactRecorder, Recorder},
    tensor::activation::softmax,
};
use clap::ValueEnum;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf};

#[derive(Debug, Clone, Default, ValueEnum, Serialize, Deserialize)]
pub enum Output {
    #[default]
    Tty,
    Json,
}

#[derive(Config, Debug)]
pub struct PredictConfig {
    model: BackboneType,
    checkpoint: PathBuf,
    input: PathBuf,
    output: Output,
    #[config(default = 32)]
    batch_size: usize,
    #[config(default = 8)]
    num_workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassScore {
    pub name: String,
    pub probability: f32,
}

/// One classification result: the softmax distribution, its argmax label and
/// the confidence assigned to that label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
    pub scores: Vec<ClassScore>,
}

impl Prediction {
    fn from_probabilities(probabilities: &[f32]) -> Self {
        debug_assert_eq!(probabilities.len(), CLASS_NAMES.len());
        let (index, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .expect("probability vector should not be empty");
        Self {
            label: CLASS_NAMES[index].to_string(),
            confidence,
            scores: CLASS_NAMES
                .iter()
                .zip(probabilities)
                .map(|(name, probability)| ClassScore {
                    name: name.to_string(),
                    probability: *probability,
                })
                .collect(),
        }
    }
}

/// Process-scoped handle over a trained checkpoint, loaded once and reused
/// for every classification.
pub struct Classifier<B: Backend> {
    model: Model<B>,
    device: B::Device,
}

impl<B: Backend> Classifier<B> {
    pub fn load(backbone: BackboneType, checkpoint: PathBuf, device: B::Device) -> Result<Self> {
        let record = CompactRecorder::new()
            .load(checkpoint, &device)
            .context("Failed to load checkpoint")?;
        let model = ModelConfig::new(backbone)
            .init::<B>(&device)?
            .load_record(record);
        Ok(Self { model, device })
    }

    /// Classify one decoded image. Deterministic for identical input.
    pub fn classify(&self, image: &DynamicImage) -> Prediction {
        let data = data::normalize_image(image);
        let input =
            Tensor::<B, 1>::from_data(&data[..], &self.device).reshape([1, 3, SIZE, SIZE]);
        let probabilities = softmax(self.model.forward(input), 1)
            .into_data()
            .to_vec::<f32>()
            .expect("probabilities should convert to a float vector");
        Prediction::from_probabilities(&probabilities)
    }
}

pub fn predict<B: Backend>(config: PredictConfig, device: B::Device) -> Result<()> {
    let model = ModelConfig::new(config.model)
        .init::<B>(&device)?
        .load_record(
            CompactRecorder::new()
                .load(config.checkpoint, &device)
                .expect("Failed to load checkpoint"),
        );
    let batcher_predict = ImageBatcher::<B>::new(device.clone());
    let dataloader_predict = DataLoaderBuilder::new(batcher_predict)
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(ImageDataSet::predict(config.input)?);

    match config.output {
        Output::Tty => {
            for batch in dataloader_predict.iter() {
                let probabilities = softmax(model.forward(batch.datas), 1)
                    .into_data()
                    .to_vec::<f32>()
                    .unwrap();
                for (path, chunk) in batch
                    .paths
                    .into_iter()
                    .zip(probabilities.chunks(CLASS_NAMES.len()))
                {
                    let prediction = Prediction::from_probabilities(chunk);
                    println!(
                        "{}\t{}\t{:.2}%",
                        path.display(),
                        prediction.label,
                        prediction.confidence * 100.0
                    );
                }
            }
        }
        Output::Json => {
            let mut output: HashMap<PathBuf, Prediction> = HashMap::new();
            for batch in dataloader_predict.iter() {
                let probabilities = softmax(model.forward(batch.datas), 1)
                    .into_data()
                    .to_vec::<f32>()
                    .unwrap();
                for (path, chunk) in batch
                    .paths
                    .into_iter()
                    .zip(probabilities.chunks(CLASS_NAMES.len()))
                {
                    output.insert(path, Prediction::from_probabilities(chunk));
                }
            }
            serde_json::to_writer_pretty(std::io::stdout(), &output).unwrap();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn classifier() -> Classifier<TestBackend> {
        let device = Default::default();
        let model = ModelConfig::new(BackboneType::Layer18)
            .init::<TestBackend>(&device)
            .unwrap();
        Classifier { model, device }
    }

    fn test_image() -> DynamicImage {
        DynamicImage::ImageRgb8(image::RgbImage::from_fn(64, 48, |x, y| {
            image::Rgb([(3 * x % 256) as u8, (5 * y % 256) as u8, 90])
        }))
    }

    #[test]
    fn classify_returns_a_distribution_over_all_classes() {
        let prediction = classifier().classify(&test_image());
        assert_eq!(prediction.scores.len(), CLASS_NAMES.len());
        assert!(prediction.scores.iter().all(|s| s.probability >= 0.0));
        let sum: f32 = prediction.scores.iter().map(|s| s.probability).sum();
        assert!((sum - 1.0).abs() < 1e-4, "sum was {sum}");
    }

    #[test]
    fn label_is_the_argmax_class() {
        let prediction = classifier().classify(&test_image());
        let best = prediction
            .scores
            .iter()
            .max_by(|a, b| a.probability.total_cmp(&b.probability))
            .unwrap();
        assert_eq!(prediction.label, best.name);
        assert_eq!(prediction.confidence, best.probability);
    }

    #[test]
    fn classification_is_deterministic() {
        let classifier = classifier();
        let image = test_image();
        let first = classifier.classify(&image);
        let second = classifier.classify(&image);
        assert_eq!(
            first.scores.iter().map(|s| s.probability).collect::<Vec<_>>(),
            second
                .scores
                .iter()
                .map(|s| s.probability)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn prediction_serializes_with_class_names() {
        let prediction = Prediction::from_probabilities(&[0.1, 0.2, 0.4, 0.2, 0.1]);
        assert_eq!(prediction.label, "Psoriasis");
        let json = serde_json::to_string(&prediction).unwrap();
        for class in CLASS_NAMES {
            assert!(json.contains(class));
        }
    }
}
