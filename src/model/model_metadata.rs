//! モデルメタデータの定義
//!
//! 重みと対になるクラス名一覧・入力サイズなどを保持し、tar.gz 内に metadata.json として保存します。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::ArtifactError;

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMetadata {
    /// クラス名（出力インデックス順）
    /// 例: ["akiec", "bcc", "bkl", "df", "mel", "nv", "vasc"]
    pub class_names: Vec<String>,

    /// 出力層の幅（class_names の長さと一致する）
    pub num_classes: usize,

    /// モデル入力サイズ（正方形）
    pub image_size: usize,

    /// 分類ヘッドの中間層ユニット数
    pub hidden_units: usize,

    /// 特徴抽出器の名前
    #[serde(default = "default_backbone")]
    pub backbone: String,

    /// 学習エポック数
    pub num_epochs: usize,

    /// 学習に使った枚数
    #[serde(default)]
    pub num_train_samples: usize,

    /// 検証に使った枚数
    #[serde(default)]
    pub num_validation_samples: usize,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

fn default_backbone() -> String {
    "mobilenet_v2".to_string()
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        class_names: Vec<String>,
        image_size: usize,
        hidden_units: usize,
        num_epochs: usize,
        num_train_samples: usize,
        num_validation_samples: usize,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            num_classes: class_names.len(),
            class_names,
            image_size,
            hidden_units,
            backbone: default_backbone(),
            num_epochs,
            num_train_samples,
            num_validation_samples,
            trained_at,
        }
    }

    /// クラス名と出力幅の整合性を確認
    pub fn validate(&self) -> std::result::Result<(), ArtifactError> {
        if self.class_names.is_empty() {
            return Err(ArtifactError::Mismatch("クラス名が空です".to_string()));
        }
        if self.class_names.len() != self.num_classes {
            return Err(ArtifactError::Mismatch(format!(
                "クラス名 {} 個に対して出力幅が {} です",
                self.class_names.len(),
                self.num_classes
            )));
        }
        let unique: HashSet<&String> = self.class_names.iter().collect();
        if unique.len() != self.class_names.len() {
            return Err(ArtifactError::Mismatch("クラス名が重複しています".to_string()));
        }
        if self.image_size == 0 {
            return Err(ArtifactError::Mismatch("入力サイズが0です".to_string()));
        }
        Ok(())
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        let metadata: Self = serde_json::from_str(json).map_err(ArtifactError::from)?;
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_json_roundtrip_keeps_class_order() {
        let metadata = ModelMetadata::new(classes(&["nv", "mel", "bcc"]), 224, 128, 5, 80, 20);
        let json = metadata.to_json_string().unwrap();
        let restored = ModelMetadata::from_json_string(&json).unwrap();

        assert_eq!(restored.class_names, ["nv", "mel", "bcc"]);
        assert_eq!(restored.num_classes, 3);
        assert_eq!(restored, metadata);
    }

    #[test]
    fn test_validate_detects_mismatch() {
        let mut metadata = ModelMetadata::new(classes(&["nv", "mel"]), 224, 128, 5, 0, 0);
        assert!(metadata.validate().is_ok());

        metadata.num_classes = 7;
        assert!(matches!(metadata.validate(), Err(ArtifactError::Mismatch(_))));

        let duplicated = ModelMetadata::new(classes(&["nv", "nv"]), 224, 128, 5, 0, 0);
        assert!(duplicated.validate().is_err());
    }

    #[test]
    fn test_corrupt_json_is_reported() {
        let err = ModelMetadata::from_json_string("{\"class_names\": 3}").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ArtifactError>(),
            Some(ArtifactError::Corrupt(_))
        ));
    }
}
