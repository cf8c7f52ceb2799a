//! クラスごとに上限を設けたサンプリングによるデータセット構築

use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;

use crate::csv_loader::LesionMetadata;
use crate::dataset::image_loader::{ImageLoader, LesionImage};
use crate::types::MetadataRecord;

/// 読み込み進捗をログに出す間隔
const PROGRESS_INTERVAL: usize = 50;

/// データセット構築エラー
#[derive(Error, Debug)]
pub enum DatasetError {
    /// メタデータにレコードが無い
    #[error("メタデータにレコードがありません")]
    NoRecords,

    /// 画像が1枚も読み込めなかった
    #[error("読み込めた画像が1枚もありません（失敗: {failed} 枚）")]
    Empty { failed: usize },
}

/// 画像とラベルの並列配列
#[derive(Debug, Clone)]
pub struct BalancedSamples {
    images: Vec<LesionImage>,
    labels: Vec<usize>,
    failed_loads: usize,
}

impl BalancedSamples {
    pub fn images(&self) -> &[LesionImage] {
        &self.images
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// 読み込みに失敗してスキップした枚数
    pub fn failed_loads(&self) -> usize {
        self.failed_loads
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// ラベルごとの件数
    pub fn class_counts(&self, num_classes: usize) -> Vec<usize> {
        let mut counts = vec![0; num_classes];
        for &label in &self.labels {
            if let Some(count) = counts.get_mut(label) {
                *count += 1;
            }
        }
        counts
    }

    pub fn into_parts(self) -> (Vec<LesionImage>, Vec<usize>) {
        (self.images, self.labels)
    }
}

/// クラスごとに min(上限, 件数) 件を非復元抽出する
///
/// クラスごとに同じシードで乱数を初期化するため、あるクラスの選択は他クラスの件数に依存しない
pub fn select_balanced_records(
    metadata: &LesionMetadata,
    max_per_class: usize,
    seed: u64,
) -> Vec<&MetadataRecord> {
    let mut selected = Vec::new();

    for dx in metadata.classes_in_order_of_appearance() {
        let class_records: Vec<&MetadataRecord> =
            metadata.records().iter().filter(|r| r.dx == dx).collect();
        let sample_size = max_per_class.min(class_records.len());

        let mut rng = StdRng::seed_from_u64(seed);
        let picked = rand::seq::index::sample(&mut rng, class_records.len(), sample_size);
        selected.extend(picked.into_iter().map(|i| class_records[i]));

        log::debug!("  {}: {} / {} 件を選択", dx, sample_size, class_records.len());
    }

    selected
}

/// クラス均衡データセットを構築
///
/// 読み込みに失敗した画像は数えてスキップする。1枚も読めなければエラー
pub fn create_balanced_dataset(
    metadata: &LesionMetadata,
    loader: &ImageLoader,
    max_per_class: usize,
    image_size: usize,
    seed: u64,
) -> Result<BalancedSamples, DatasetError> {
    if metadata.is_empty() {
        return Err(DatasetError::NoRecords);
    }

    let selected = select_balanced_records(metadata, max_per_class, seed);
    log::info!("クラス均衡データセットを作成します: {} 枚", selected.len());

    let mut images = Vec::with_capacity(selected.len());
    let mut labels = Vec::with_capacity(selected.len());
    let mut failed_loads = 0;

    for record in &selected {
        let label = match metadata.label_of(record) {
            Some(label) => label,
            None => {
                failed_loads += 1;
                continue;
            }
        };

        match loader.load_image(&record.image_id, image_size) {
            Some(image) => {
                images.push(image);
                labels.push(label);

                if images.len() % PROGRESS_INTERVAL == 0 {
                    log::info!("{} 枚読み込み完了...", images.len());
                }
            }
            None => failed_loads += 1,
        }
    }

    if failed_loads > 0 {
        log::warn!("{} 枚の画像を読み込めませんでした", failed_loads);
    }

    if images.is_empty() {
        return Err(DatasetError::Empty {
            failed: failed_loads,
        });
    }

    log::info!("データセット作成完了: {} 枚 ({}x{})", images.len(), image_size, image_size);

    Ok(BalancedSamples {
        images,
        labels,
        failed_loads,
    })
}
