pub mod model_metadata;
pub mod model_storage;
pub mod inference_config;
pub mod config;

pub use model_metadata::ModelMetadata;
pub use model_storage::{
    artifact_path, load_metadata, load_model_binary, load_model_with_metadata, print_metadata_info,
    save_model_with_metadata,
};
pub use inference_config::InferenceConfig;
pub use config::{AppConfig, DataSettings, DeviceType, ModelSettings, RiskThresholds, TrainingSettings};
