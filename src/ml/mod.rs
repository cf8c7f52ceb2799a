pub mod backbone;
pub mod ml_model;
pub mod training;
pub mod inference;
pub mod classifier;

pub use backbone::{MobileNetV2, MobileNetV2Config, FEATURE_CHANNELS};
pub use ml_model::{ModelConfig, SkinLesionNet};
pub use training::{train_model, LesionBatch, LesionBatcher, LesionItem, TrainingOutcome};
pub use inference::{restore_model, InferenceEngine, ProbabilityModel};
pub use classifier::{ClassifierState, DataSource, SkinLesionModel};
