//! 皮膚病変分類器
//!
//! 起動時にデータソース（実データ / デモ）を一度だけ決め、学習または保存済みモデルの
//! 読み込みを経て、常に有効な確率分布を返す分類器を構築します。

use burn::tensor::backend::Backend;
use burn_autodiff::Autodiff;
use image::DynamicImage;
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

use crate::csv_loader::{load_metadata, LesionMetadata};
use crate::dataset::{create_balanced_dataset, preprocess_image, ImageLoader};
use crate::ml::inference::{InferenceEngine, ProbabilityModel};
use crate::ml::training::train_model;
use crate::ml::{ModelConfig, SkinLesionNet};
use crate::model::{AppConfig, DataSettings};
use crate::types::{Prediction, DEMO_CLASS_NAMES};

/// 学習データの出どころ
#[derive(Debug, Clone)]
pub enum DataSource {
    /// HAM10000 のメタデータが読めた
    RealDataset(LesionMetadata),
    /// データセットが無い、または使わない
    DemoFallback,
}

impl DataSource {
    /// データ配置と利用指定からデータソースを決める
    pub fn select(data: &DataSettings, use_real_data: bool) -> Self {
        if !use_real_data {
            log::info!("デモモードで起動します");
            return DataSource::DemoFallback;
        }

        match load_metadata(data) {
            Some(metadata) => DataSource::RealDataset(metadata),
            None => {
                log::warn!("データセットを利用できないためデモモードで起動します");
                DataSource::DemoFallback
            }
        }
    }
}

/// 分類器の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierState {
    /// 未学習モデル + 固定の7クラス
    Demo,
    /// このプロセスで実データから学習した
    Trained,
    /// 保存済みモデルを読み込んだ
    Loaded,
}

impl fmt::Display for ClassifierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifierState::Demo => write!(f, "デモ（未学習）"),
            ClassifierState::Trained => write!(f, "学習済み"),
            ClassifierState::Loaded => write!(f, "保存済みモデル"),
        }
    }
}

/// 皮膚病変分類器
pub struct SkinLesionModel<B: Backend> {
    state: ClassifierState,
    class_names: Vec<String>,
    predictor: Box<dyn ProbabilityModel>,
    backend: PhantomData<B>,
}

impl<B: Backend> SkinLesionModel<B> {
    /// データソースを決めて分類器を構築
    ///
    /// 実データ → 学習、それ以外 → 保存済みモデルまたはデモモデル
    pub fn new(config: &AppConfig, data_dir: &Path, use_real_data: bool, device: &B::Device) -> Self {
        let mut config = config.clone();
        config.data = config.data.with_data_dir(data_dir);

        match DataSource::select(&config.data, use_real_data) {
            DataSource::RealDataset(metadata) => Self::train_with_real_data(&config, &metadata, device),
            DataSource::DemoFallback => Self::load_demo_model(&config, device),
        }
    }

    /// 任意の確率モデルから分類器を組み立てる
    pub fn from_predictor(
        state: ClassifierState,
        class_names: Vec<String>,
        predictor: Box<dyn ProbabilityModel>,
    ) -> Self {
        Self {
            state,
            class_names,
            predictor,
            backend: PhantomData,
        }
    }

    fn from_network(
        state: ClassifierState,
        class_names: Vec<String>,
        model: SkinLesionNet<B>,
        image_size: usize,
        device: &B::Device,
    ) -> Self {
        let engine = InferenceEngine::new(model, image_size, device.clone());
        Self::from_predictor(state, class_names, Box::new(engine))
    }

    /// 凍結特徴抽出器 + 分類ヘッドのモデルを作る
    pub fn create_model(config: &AppConfig, num_classes: usize, device: &B::Device) -> SkinLesionNet<B> {
        ModelConfig::from_settings(num_classes, &config.model).init::<B>(device)
    }

    /// 実データで学習する
    ///
    /// データセットを構築できない・学習に失敗した場合はデモモードへ切り替える
    pub fn train_with_real_data(config: &AppConfig, metadata: &LesionMetadata, device: &B::Device) -> Self {
        let loader = ImageLoader::new(&config.data);
        let samples = match create_balanced_dataset(
            metadata,
            &loader,
            config.training.max_per_class,
            config.model.image_size,
            config.training.seed,
        ) {
            Ok(samples) => samples,
            Err(e) => {
                log::warn!("データセットを構築できません: {}。デモモードに切り替えます", e);
                return Self::load_demo_model(config, device);
            }
        };

        let class_names = metadata.class_names().to_vec();
        let model = ModelConfig::from_settings(class_names.len(), &config.model).init::<Autodiff<B>>(device);
        match train_model::<B>(model, samples, &class_names, config, device) {
            Ok(outcome) => Self::from_network(
                ClassifierState::Trained,
                outcome.metadata.class_names,
                outcome.model,
                outcome.metadata.image_size,
                device,
            ),
            Err(e) => {
                // パニックも含めて学習失敗はデモモードへ
                log::error!("学習に失敗しました: {:#}。デモモードに切り替えます", e);
                Self::load_demo_model(config, device)
            }
        }
    }

    /// 保存済みモデルを読み込む
    ///
    /// 読めない場合は未学習モデルと固定の7クラスで続行する
    pub fn load_demo_model(config: &AppConfig, device: &B::Device) -> Self {
        let artifact_path = &config.model.artifact_path;

        match InferenceEngine::<B>::load(artifact_path, device) {
            Ok((engine, inference_config)) => {
                log::info!(
                    "保存済みモデルを読み込みました: {} ({} クラス)",
                    artifact_path.display(),
                    inference_config.num_classes()
                );
                Self::from_predictor(
                    ClassifierState::Loaded,
                    inference_config.class_names,
                    Box::new(engine),
                )
            }
            Err(e) => {
                log::warn!("保存済みモデルを使用できません: {:#}", e);
                log::warn!("デモモデルを使用します（予測は学習されていません）");

                let class_names: Vec<String> = DEMO_CLASS_NAMES.iter().map(|s| s.to_string()).collect();
                let model = Self::create_model(config, class_names.len(), device);
                Self::from_network(
                    ClassifierState::Demo,
                    class_names,
                    model,
                    config.model.image_size,
                    device,
                )
            }
        }
    }

    /// 画像を分類する
    ///
    /// 前処理・推論・出力のいずれかで失敗した場合は全クラス均等の確率を返す
    pub fn predict(&self, image: &DynamicImage) -> Prediction {
        let processed = match preprocess_image(image, self.predictor.image_size()) {
            Ok(processed) => processed,
            Err(e) => {
                log::warn!("前処理エラー: {:#}", e);
                return Prediction::uniform(&self.class_names);
            }
        };

        let probabilities = match self.predictor.predict_probabilities(processed.pixels()) {
            Ok(probabilities) => probabilities,
            Err(e) => {
                log::warn!("推論エラー: {:#}", e);
                return Prediction::uniform(&self.class_names);
            }
        };

        Prediction::from_probabilities(&self.class_names, &probabilities).unwrap_or_else(|| {
            log::warn!(
                "推論結果が不正です（{} 個の値、{} クラス）",
                probabilities.len(),
                self.class_names.len()
            );
            Prediction::uniform(&self.class_names)
        })
    }

    pub fn state(&self) -> ClassifierState {
        self.state
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn image_size(&self) -> usize {
        self.predictor.image_size()
    }
}
