//! 皮膚病変（ダーモスコピー画像）分類ライブラリ
//!
//! HAM10000 のメタデータと画像からクラス均衡データセットを作り、
//! ImageNet 学習済み MobileNetV2 を特徴抽出器とした転移学習で分類器を構築します。
//! データセットや保存済みモデルが無い場合はデモモードで動作します。

pub mod types;
pub mod error;
pub mod csv_loader;
pub mod dataset;
pub mod model;
pub mod report;
#[cfg(feature = "ml")]
pub mod ml;
#[cfg(feature = "ml")]
pub mod context;

pub use error::ArtifactError;
pub use types::{LabelEncoder, MetadataRecord, Prediction, DEMO_CLASS_NAMES};
