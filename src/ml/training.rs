//! モデル学習
//!
//! クラス均衡データセットを層化分割し、凍結特徴抽出器 + 分類ヘッドを学習して
//! 重みとクラス名を対で保存します。

use anyhow::{Context, Result};
use burn::{
    data::{dataloader::batcher::Batcher, dataloader::DataLoaderBuilder},
    module::{AutodiffModule, Module},
    optim::AdamConfig,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{
        backend::{AutodiffBackend, Backend},
        Int, Tensor,
    },
    train::{
        metric::{AccuracyMetric, LossMetric},
        ClassificationOutput, LearnerBuilder, LearningStrategy, TrainOutput, TrainStep, ValidStep,
    },
};
use burn_autodiff::Autodiff;
use burn_dataset::InMemDataset;
use std::path::{Path, PathBuf};

use crate::dataset::{stratified_split, BalancedSamples, LesionImage};
use crate::ml::inference::guard_backend_panic;
use crate::ml::SkinLesionNet;
use crate::model::{save_model_with_metadata, AppConfig, ModelMetadata};

/// データセットアイテム（正規化済み画素とラベル）
#[derive(Clone, Debug)]
pub struct LesionItem {
    pub pixels: Vec<f32>,
    pub label: usize,
}

/// インデックスで指定した画像からインメモリデータセットを作る
pub fn build_dataset(
    images: &[LesionImage],
    labels: &[usize],
    indices: &[usize],
) -> InMemDataset<LesionItem> {
    let items = indices
        .iter()
        .map(|&i| LesionItem {
            pixels: images[i].pixels().to_vec(),
            label: labels[i],
        })
        .collect();
    InMemDataset::new(items)
}

/// バッチャー
#[derive(Clone)]
pub struct LesionBatcher {
    image_size: usize,
}

impl LesionBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct LesionBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, LesionItem, LesionBatch<B>> for LesionBatcher {
    fn batch(&self, items: Vec<LesionItem>, device: &B::Device) -> LesionBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;
        let mut all_pixels = Vec::with_capacity(batch_size * 3 * size * size);
        let mut targets = Vec::with_capacity(batch_size);

        for item in items {
            all_pixels.extend_from_slice(&item.pixels);
            targets.push(item.label as i64);
        }

        // 1回の転送でバッチ全体をデバイスへ
        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), device)
            .reshape([batch_size, 3, size, size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets.as_slice(), device);

        LesionBatch { images, targets }
    }
}

/// TrainStep実装 (学習時の順伝播 + 逆伝播)
///
/// 特徴抽出器は推論モードで通し、勾配はヘッドにのみ流す
impl<B: AutodiffBackend> TrainStep<LesionBatch<B>, ClassificationOutput<B>> for SkinLesionNet<B> {
    fn step(&self, batch: LesionBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let features = self.backbone.valid().forward(batch.images.inner());
        let logits = self.forward_head(Tensor::from_inner(features));
        let item = self.classification_output(logits, batch.targets);

        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

/// ValidStep実装 (検証時の順伝播のみ)
impl<B: Backend> ValidStep<LesionBatch<B>, ClassificationOutput<B>> for SkinLesionNet<B> {
    fn step(&self, batch: LesionBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

/// 学習結果
pub struct TrainingOutcome<B: Backend> {
    pub model: SkinLesionNet<B>,
    pub metadata: ModelMetadata,
    pub artifact_path: PathBuf,
}

/// モデルの重みをバイト列にする
pub fn model_to_bytes<B: Backend>(model: &SkinLesionNet<B>) -> Result<Vec<u8>> {
    BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(model.clone().into_record(), ())
        .map_err(|e| anyhow::anyhow!("モデル重みのシリアライズエラー: {:?}", e))
}

/// モデル学習を実行
///
/// `model` は初期化済みのモデル（特徴抽出器は凍結済み）、`class_names` はラベルエンコーダの
/// 順序（出力インデックス順）
pub fn train_model<B: Backend>(
    model: SkinLesionNet<Autodiff<B>>,
    samples: BalancedSamples,
    class_names: &[String],
    config: &AppConfig,
    device: &B::Device,
) -> Result<TrainingOutcome<B>> {
    let training = &config.training;
    let image_size = config.model.image_size;

    let num_classes = class_names.len();
    if model.num_outputs() != num_classes {
        anyhow::bail!(
            "出力層の幅 {} に対してクラス名が {} 個です",
            model.num_outputs(),
            num_classes
        );
    }

    let (images, labels) = samples.into_parts();
    let split = stratified_split(&labels, 1.0 - training.train_ratio, training.seed);

    log::info!("学習データ: {} 枚", split.train.len());
    log::info!("検証データ: {} 枚", split.validation.len());

    let dataset_train = build_dataset(&images, &labels, &split.train);
    let dataset_val = build_dataset(&images, &labels, &split.validation);
    drop(images);

    log::info!(
        "モデル設定: {} クラス, 入力サイズ: {}x{}, 中間層: {}",
        num_classes,
        image_size,
        image_size,
        config.model.hidden_units
    );

    let dataloader_train = DataLoaderBuilder::<Autodiff<B>, _, _>::new(LesionBatcher::new(image_size))
        .batch_size(training.batch_size)
        .shuffle(training.seed)
        .num_workers(0)
        .build(dataset_train);

    let dataloader_val = DataLoaderBuilder::<B, _, _>::new(LesionBatcher::new(image_size))
        .batch_size(training.batch_size)
        .num_workers(0)
        .build(dataset_val);

    // 学習ログの出力先（保存先の隣の作業ディレクトリ）
    let artifact_dir = training_dir(&config.model.artifact_path);
    std::fs::create_dir_all(&artifact_dir)
        .context(format!("Failed to create training directory: {:?}", artifact_dir))?;
    let artifact_dir_str = artifact_dir.to_string_lossy().to_string();

    log::info!(
        "学習を開始します: エポック数 {}, バッチサイズ {}, 学習率 {}",
        training.num_epochs,
        training.batch_size,
        training.learning_rate
    );

    let learner = LearnerBuilder::new(&artifact_dir_str)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .learning_strategy(LearningStrategy::SingleDevice(device.clone()))
        .num_epochs(training.num_epochs)
        .summary()
        .build(model, AdamConfig::new().init(), training.learning_rate);

    let fitted = guard_backend_panic("学習", || learner.fit(dataloader_train, dataloader_val));
    std::fs::remove_dir_all(&artifact_dir).ok();
    let trained = fitted?.model;
    log::info!("学習が完了しました");

    let model_binary = model_to_bytes(&trained)?;
    let metadata = ModelMetadata::new(
        class_names.to_vec(),
        image_size,
        config.model.hidden_units,
        training.num_epochs,
        split.train.len(),
        split.validation.len(),
    );

    let artifact_path =
        save_model_with_metadata(&config.model.artifact_path, &metadata, &model_binary)?;
    log::info!("モデルを保存しました: {}", artifact_path.display());

    Ok(TrainingOutcome {
        model: trained,
        metadata,
        artifact_path,
    })
}

/// 学習ログ用の作業ディレクトリ
fn training_dir(artifact_path: &Path) -> PathBuf {
    match artifact_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join("training_logs"),
        _ => PathBuf::from("training_logs"),
    }
}
