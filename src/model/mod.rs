pub mod config;
pub mod model_metadata;
pub mod model_storage;

pub use config::{AppConfig, DataSettings, DeviceType, ModelSettings, OutputSettings, TrainingSettings};
pub use model_metadata::{EpochMetrics, ModelMetadata};
pub use model_storage::{
    load_metadata, load_model_with_metadata, load_web_manifest, log_metadata_info,
    save_model_with_metadata, save_web_export, WebModelManifest,
};
