//! 皮膚病変分類モデル
//!
//! 凍結した MobileNetV2 特徴抽出器の上に、学習対象の小さな分類ヘッドを載せた転移学習モデルです。

use burn::{
    config::Config,
    module::Module,
    nn::{
        loss::CrossEntropyLossConfig,
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};
use std::path::PathBuf;

use crate::ml::backbone::{build_frozen_backbone, MobileNetV2, MobileNetV2Config, FEATURE_CHANNELS};
use crate::model::ModelSettings;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// 入力画像サイズ（正方形）
    #[config(default = 224)]
    pub image_size: usize,
    /// 中間層ユニット数
    #[config(default = 128)]
    pub hidden_units: usize,
    /// プーリング直後のドロップアウト率
    #[config(default = 0.2)]
    pub feature_dropout: f64,
    /// 中間層後のドロップアウト率
    #[config(default = 0.5)]
    pub hidden_dropout: f64,
    /// torchvision の学習済み重み
    pub backbone_weights: Option<PathBuf>,
}

impl ModelConfig {
    /// アプリ設定からモデル設定を作成
    pub fn from_settings(num_classes: usize, settings: &ModelSettings) -> Self {
        Self::new(num_classes)
            .with_image_size(settings.image_size)
            .with_hidden_units(settings.hidden_units)
            .with_feature_dropout(settings.feature_dropout)
            .with_hidden_dropout(settings.hidden_dropout)
            .with_backbone_weights(settings.backbone_weights.clone())
    }

    /// 学習済み重みを読み込んだ（あれば）凍結特徴抽出器でモデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> SkinLesionNet<B> {
        let backbone = build_frozen_backbone(self.backbone_weights.as_deref(), device);
        self.init_with_backbone(backbone, device)
    }

    /// 重みファイルを読まずに初期化（保存済みモデルの復元用）
    pub fn init_untrained<B: Backend>(&self, device: &B::Device) -> SkinLesionNet<B> {
        let backbone = MobileNetV2Config::new().init::<B>(device).no_grad();
        self.init_with_backbone(backbone, device)
    }

    fn init_with_backbone<B: Backend>(
        &self,
        backbone: MobileNetV2<B>,
        device: &B::Device,
    ) -> SkinLesionNet<B> {
        log::debug!(
            "[Model] 入力: {}x{} / 特徴: {} -> {} -> {}",
            self.image_size,
            self.image_size,
            FEATURE_CHANNELS,
            self.hidden_units,
            self.num_classes
        );

        SkinLesionNet {
            backbone,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            feature_dropout: DropoutConfig::new(self.feature_dropout).init(),
            hidden: LinearConfig::new(FEATURE_CHANNELS, self.hidden_units).init(device),
            hidden_dropout: DropoutConfig::new(self.hidden_dropout).init(),
            output: LinearConfig::new(self.hidden_units, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

/// 皮膚病変分類モデル
///
/// # アーキテクチャ
/// - MobileNetV2 特徴抽出器（凍結）
/// - Global Average Pooling
/// - Dropout 0.2
/// - FC: 1280 -> 128 + ReLU
/// - Dropout 0.5
/// - FC: 128 -> num_classes
/// - Softmax (推論時)
#[derive(Module, Debug)]
pub struct SkinLesionNet<B: Backend> {
    pub(crate) backbone: MobileNetV2<B>,
    pool: AdaptiveAvgPool2d,
    feature_dropout: Dropout,
    hidden: Linear<B>,
    hidden_dropout: Dropout,
    output: Linear<B>,
    activation: Relu,
}

impl<B: Backend> SkinLesionNet<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]（値は [0, 1]）
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.forward(images);
        self.forward_head(features)
    }

    /// 特徴マップから分類ヘッドのみを通す
    pub fn forward_head(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, channels, _, _] = features.dims();

        let x = self.pool.forward(features);
        let x = x.reshape([batch_size, channels]);
        let x = self.feature_dropout.forward(x);

        let x = self.hidden.forward(x);
        let x = self.activation.forward(x);
        let x = self.hidden_dropout.forward(x);

        self.output.forward(x)
    }

    /// クラスごとの確率 [batch_size, num_classes]
    pub fn forward_probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 出力層の幅
    pub fn num_outputs(&self) -> usize {
        self.output.weight.val().dims()[1]
    }

    /// 損失計算（学習・検証共通）
    ///
    /// 整数ラベルに対する交差エントロピー（one-hot に対するカテゴリカル交差エントロピーと同じ）
    pub fn classification_output(
        &self,
        logits: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let loss = CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits.clone(), targets.clone());

        ClassificationOutput::new(loss, logits, targets)
    }

    /// 順伝播と損失計算
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let logits = self.forward(images);
        self.classification_output(logits, targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn test_config(num_classes: usize) -> ModelConfig {
        ModelConfig::new(num_classes).with_image_size(32)
    }

    #[test]
    fn test_output_width_matches_num_classes() {
        let device = Default::default();
        let model = test_config(7).init_untrained::<TestBackend>(&device);
        assert_eq!(model.num_outputs(), 7);

        let images = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        assert_eq!(model.forward(images).dims(), [2, 7]);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let device = Default::default();
        let model = test_config(5).init_untrained::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::ones([3, 3, 32, 32], &device) * 0.5;
        let probabilities = model
            .forward_probabilities(images)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        for row in probabilities.chunks(5) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4);
            assert!(row.iter().all(|p| *p >= 0.0));
        }
    }

    #[test]
    fn test_config_from_settings() {
        let settings = ModelSettings::default();
        let config = ModelConfig::from_settings(7, &settings);
        assert_eq!(config.image_size, 224);
        assert_eq!(config.hidden_units, 128);
        assert_eq!(config.feature_dropout, 0.2);
        assert_eq!(config.hidden_dropout, 0.5);
    }

    #[test]
    fn test_classification_loss_is_finite() {
        let device = Default::default();
        let model = test_config(3).init_untrained::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([0, 2], &device);
        let output = model.forward_classification(images, targets);

        let loss = output.loss.into_scalar();
        assert!(loss.is_finite());
    }
}
