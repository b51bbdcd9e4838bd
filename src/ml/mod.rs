pub mod backbone;
pub mod callbacks;
pub mod data;
pub mod export;
pub mod inference;
pub mod ml_model;
pub mod training;

pub use backbone::MobileNetV2;
pub use callbacks::{CheckpointKeeper, EarlyStopping, EpochOutcome, ReduceLrOnPlateau, StopReason, TrainingMonitor};
pub use data::{BatchSequence, GarmentBatch, GarmentDataset};
pub use export::{export_model, ExportedModel};
pub use inference::InferenceEngine;
pub use ml_model::{GarmentRegressor, ModelConfig, RegressionHead};
pub use training::{train_model, TrainingReport};
