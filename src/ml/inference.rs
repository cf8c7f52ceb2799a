//! モデル推論機能

use anyhow::Result;
use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use crate::error::ArtifactError;
use crate::ml::{ModelConfig, SkinLesionNet};
use crate::model::{load_model_with_metadata, InferenceConfig, ModelMetadata, ModelSettings};

/// 正規化済み画素からクラス確率を返すモデル
///
/// 画素は [0, 1]、(C, H, W) の順で `image_size` 四方
pub trait ProbabilityModel {
    /// 入力画像サイズ（正方形）
    fn image_size(&self) -> usize;

    /// 1枚分のクラス確率（出力インデックス順）
    fn predict_probabilities(&self, pixels: &[f32]) -> Result<Vec<f32>>;
}

/// バックエンド内部のパニックをエラーとして返す
pub(crate) fn guard_backend_panic<T>(task: &str, f: impl FnOnce() -> T) -> Result<T> {
    catch_unwind(AssertUnwindSafe(f))
        .map_err(|_| anyhow::anyhow!("{}中にパニックが発生しました", task))
}

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: SkinLesionNet<B>,
    image_size: usize,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    pub fn new(model: SkinLesionNet<B>, image_size: usize, device: B::Device) -> Self {
        Self {
            model,
            image_size,
            device,
        }
    }

    /// モデルファイルを読み込んで推論エンジンを初期化
    pub fn load(artifact_path: &Path, device: &B::Device) -> Result<(Self, InferenceConfig)> {
        let (model, metadata) = restore_model::<B>(artifact_path, device)?;
        let config = InferenceConfig::from_metadata(&metadata);
        Ok((Self::new(model, metadata.image_size, device.clone()), config))
    }
}

impl<B: Backend> ProbabilityModel for InferenceEngine<B> {
    fn image_size(&self) -> usize {
        self.image_size
    }

    fn predict_probabilities(&self, pixels: &[f32]) -> Result<Vec<f32>> {
        let size = self.image_size;
        if pixels.len() != 3 * size * size {
            anyhow::bail!(
                "入力サイズが不正です: {} 要素 (期待: 3x{}x{})",
                pixels.len(),
                size,
                size
            );
        }

        let output = guard_backend_panic("推論", || {
            let tensor = Tensor::<B, 1>::from_floats(pixels, &self.device).reshape([1, 3, size, size]);
            self.model.forward_probabilities(tensor).into_data().to_vec::<f32>()
        })?;

        output.map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))
    }
}

/// 保存済みの重みとクラス名を対で復元する
///
/// 出力層の幅がクラス数と一致しなければ `ArtifactError::Mismatch`
pub fn restore_model<B: Backend>(
    artifact_path: &Path,
    device: &B::Device,
) -> Result<(SkinLesionNet<B>, ModelMetadata)> {
    let (metadata, model_binary) = load_model_with_metadata(artifact_path)?;

    let model_config = ModelConfig::from_settings(
        metadata.num_classes,
        &ModelSettings {
            image_size: metadata.image_size,
            hidden_units: metadata.hidden_units,
            backbone_weights: None,
            ..ModelSettings::default()
        },
    );
    let model = model_config.init_untrained::<B>(device);

    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let record = recorder
        .load(model_binary, device)
        .map_err(|e| ArtifactError::Corrupt(format!("model.bin: {:?}", e)))?;

    let model = catch_unwind(AssertUnwindSafe(|| model.load_record(record)))
        .map_err(|_| ArtifactError::Mismatch("重みの形状がモデル構成と一致しません".to_string()))?;

    if model.num_outputs() != metadata.class_names.len() {
        return Err(ArtifactError::Mismatch(format!(
            "出力層の幅 {} に対してクラス名が {} 個です",
            model.num_outputs(),
            metadata.class_names.len()
        ))
        .into());
    }

    Ok((model, metadata))
}
