use crate::data::ImageBatch;
use anyhow::Result;
use burn::module::{ModuleMapper, ModuleVisitor, ParamId};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep};
use clap::builder::OsStr;
use clap::ValueEnum;
use nn::loss::CrossEntropyLoss;
use nn::{Dropout, DropoutConfig, Linear, LinearConfig, Relu};
use resnet_burn::{weights, ResNet};
use serde::{Deserialize, Serialize};

/// The conditions the classifier distinguishes, in label order.
pub const CLASS_NAMES: [&str; 5] = ["Acne", "Eczema", "Psoriasis", "Rosacea", "Vitiligo"];
pub const NUM_CLASSES: usize = CLASS_NAMES.len();

/// Width of the backbone's projection layer, the input of the head.
pub(crate) const EMBED_SIZE: usize = 128;
const HIDDEN_SIZE: usize = 64;

#[derive(Module, Debug)]
pub(crate) struct Model<B: Backend> {
    backbone: ResNet<B>,
    head: Head<B>,
}

#[derive(Module, Debug)]
pub(crate) struct Head<B: Backend> {
    activation: Relu,
    dropout: Dropout,
    fc1: Linear<B>,
    fc2: Linear<B>,
}

impl<B: Backend> Head<B> {
    fn forward(&self, embeddings: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.activation.forward(embeddings);
        let x = self.dropout.forward(x);
        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }
}

impl<B: Backend> Model<B> {
    /// # Shapes
    ///   - Images [batch_size, 3, 224, 224], normalized to [0, 1]
    ///   - Output [batch_size, num_classes] (logits)
    pub fn forward(&self, datas: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.backbone.forward(datas); // [batch_size, embed_size]
        self.head.forward(x)
    }

    fn forward_classification(
        &self,
        datas: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(datas);
        let loss =
            CrossEntropyLoss::new(None, &output.device()).forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }

    /// Number of float parameter tensors in the backbone, in visit order.
    pub(crate) fn num_backbone_tensors(&self) -> usize {
        let mut counter = ParamCounter::default();
        self.backbone.visit(&mut counter);
        counter.count
    }

    /// Clear `require_grad` on the first `frozen` float parameter tensors of
    /// the backbone. Tensors past the boundary are left untouched, so a later
    /// phase with a smaller prefix effectively unfreezes them on a freshly
    /// initialized module.
    pub(crate) fn freeze_backbone_below(self, frozen: usize) -> Self {
        let mut freezer = Freezer { index: 0, frozen };
        Self {
            backbone: self.backbone.map(&mut freezer),
            head: self.head,
        }
    }

    pub(crate) fn num_trainable_tensors(&self) -> usize {
        let mut counter = TrainableCounter::default();
        self.visit(&mut counter);
        counter.count
    }
}

impl<B: AutodiffBackend> TrainStep<ImageBatch<B>, ClassificationOutput<B>> for Model<B> {
    fn step(&self, batch: ImageBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.datas, batch.targets);
        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<ImageBatch<B>, ClassificationOutput<B>> for Model<B> {
    fn step(&self, batch: ImageBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.datas, batch.targets)
    }
}

#[derive(Default)]
struct ParamCounter {
    count: usize,
}

impl<B: Backend> ModuleVisitor<B> for ParamCounter {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, _tensor: &Tensor<B, D>) {
        self.count += 1;
    }
}

#[derive(Default)]
struct TrainableCounter {
    count: usize,
}

impl<B: Backend> ModuleVisitor<B> for TrainableCounter {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        if tensor.is_require_grad() {
            self.count += 1;
        }
    }
}

struct Freezer {
    index: usize,
    frozen: usize,
}

impl<B: Backend> ModuleMapper<B> for Freezer {
    fn map_float<const D: usize>(&mut self, _id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        let freeze = self.index < self.frozen;
        self.index += 1;
        if freeze {
            tensor.set_require_grad(false)
        } else {
            tensor
        }
    }
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    backbone: BackboneType,
    /// Start from ImageNet weights instead of a random initialization.
    #[config(default = false)]
    pretrained: bool,
    #[config(default = 0.5)]
    dropout: f64,
}

impl ModelConfig {
    pub(crate) fn init<B: Backend>(&self, device: &B::Device) -> Result<Model<B>> {
        let backbone = self.backbone.init(self.pretrained, device)?;
        Ok(Model {
            backbone,
            head: Head {
                activation: Relu,
                dropout: DropoutConfig::new(self.dropout).init(),
                fc1: LinearConfig::new(EMBED_SIZE, HIDDEN_SIZE).init(device),
                fc2: LinearConfig::new(HIDDEN_SIZE, NUM_CLASSES).init(device),
            },
        })
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, ValueEnum)]
pub enum BackboneType {
    #[default]
    Layer18 = 18,
    Layer34 = 34,
    Layer50 = 50,
    Layer101 = 101,
    Layer152 = 152,
}

impl BackboneType {
    fn init<B: Backend>(&self, pretrained: bool, device: &B::Device) -> Result<ResNet<B>> {
        let resnet = match (self, pretrained) {
            (Self::Layer18, false) => ResNet::resnet18(EMBED_SIZE, device),
            (Self::Layer34, false) => ResNet::resnet34(EMBED_SIZE, device),
            (Self::Layer50, false) => ResNet::resnet50(EMBED_SIZE, device),
            (Self::Layer101, false) => ResNet::resnet101(EMBED_SIZE, device),
            (Self::Layer152, false) => ResNet::resnet152(EMBED_SIZE, device),
            (Self::Layer18, true) => {
                ResNet::resnet18_pretrained(weights::ResNet18::ImageNet1kV1, device)?
                    .with_classes(EMBED_SIZE)
            }
            (Self::Layer34, true) => {
                ResNet::resnet34_pretrained(weights::ResNet34::ImageNet1kV1, device)?
                    .with_classes(EMBED_SIZE)
            }
            (Self::Layer50, true) => {
                ResNet::resnet50_pretrained(weights::ResNet50::ImageNet1kV1, device)?
                    .with_classes(EMBED_SIZE)
            }
            (Self::Layer101, true) => {
                ResNet::resnet101_pretrained(weights::ResNet101::ImageNet1kV1, device)?
                    .with_classes(EMBED_SIZE)
            }
            (Self::Layer152, true) => {
                ResNet::resnet152_pretrained(weights::ResNet152::ImageNet1kV1, device)?
                    .with_classes(EMBED_SIZE)
            }
        };
        Ok(resnet)
    }
}

impl From<BackboneType> for OsStr {
    fn from(value: BackboneType) -> Self {
        format!("layer{:?}", value as usize).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;
    use burn::tensor::activation::softmax;

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<TestBackend>;

    fn model<B: Backend>() -> Model<B> {
        ModelConfig::new(BackboneType::Layer18)
            .init::<B>(&Default::default())
            .unwrap()
    }

    #[test]
    fn forward_outputs_one_logit_per_class() {
        let model = model::<TestBackend>();
        let input = Tensor::zeros([2, 3, 224, 224], &Default::default());
        let logits = model.forward(input);
        assert_eq!(logits.dims(), [2, NUM_CLASSES]);
    }

    #[test]
    fn softmax_over_logits_is_a_distribution() {
        let model = model::<TestBackend>();
        let input = Tensor::ones([1, 3, 224, 224], &Default::default());
        let probs = softmax(model.forward(input), 1)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(probs.len(), NUM_CLASSES);
        assert!(probs.iter().all(|p| *p >= 0.0));
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4, "sum was {sum}");
    }

    #[test]
    fn forward_is_deterministic() {
        let model = model::<TestBackend>();
        let input = Tensor::<TestBackend, 4>::ones([1, 3, 224, 224], &Default::default());
        let first = model
            .forward(input.clone())
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        let second = model.forward(input).into_data().to_vec::<f32>().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn freezing_all_but_projection_leaves_projection_and_head_trainable() {
        let model = model::<TestAutodiffBackend>();
        let total = model.num_backbone_tensors();
        let frozen = model.freeze_backbone_below(total - 2);
        // projection weight + bias, two head layers with weight + bias each
        assert_eq!(frozen.num_trainable_tensors(), 6);
    }

    #[test]
    fn partial_freezing_keeps_later_layers_trainable() {
        let model = model::<TestAutodiffBackend>();
        let all_trainable = model.num_trainable_tensors();
        let total = model.num_backbone_tensors();
        let frozen = model.freeze_backbone_below(total / 4);
        let remaining = frozen.num_trainable_tensors();
        assert!(remaining < all_trainable);
        assert!(remaining > 6);
    }
}
