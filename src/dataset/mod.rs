//! データセット構築（画像読み込み・クラス均衡サンプリング・層化分割）

pub mod image_loader;
pub mod balanced;
pub mod split;

pub use image_loader::{preprocess_image, ImageLoader, LesionImage, RESIZE_FILTER};
pub use balanced::{create_balanced_dataset, select_balanced_records, BalancedSamples, DatasetError};
pub use split::{stratified_split, SplitIndices};
