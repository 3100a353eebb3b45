#[cfg(any(feature = "ndarray", feature = "tch", feature = "candle"))]
mod cli;
mod data;
mod model;
mod plot;
mod predict;
mod train;

#[cfg(any(feature = "ndarray", feature = "tch", feature = "candle"))]
pub use cli::run;
pub use model::{BackboneType, ModelConfig, CLASS_NAMES, NUM_CLASSES};
pub use plot::{save_curves, EpochMetrics, PhaseHistory, TrainingHistory};
pub use predict::{predict, ClassScore, Classifier, Output, Prediction, PredictConfig};
pub use train::{train, StepLrScheduler, StepLrSchedulerConfig, TrainingConfig};
