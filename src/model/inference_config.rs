//! モデルメタデータを使用した推論設定
//!
//! 保存されたモデルメタデータを読み込んで推論に必要な情報を取得します。

use crate::model::model_metadata::ModelMetadata;

/// モデルメタデータから推論用情報を取得
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    /// クラス名（モデル出力インデックス順）
    pub class_names: Vec<String>,

    /// モデル入力解像度
    pub image_size: usize,
}

impl InferenceConfig {
    /// メタデータからInferenceConfigを作成
    pub fn from_metadata(metadata: &ModelMetadata) -> Self {
        Self {
            class_names: metadata.class_names.clone(),
            image_size: metadata.image_size,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// クラスインデックスからラベルを取得
    pub fn class_index_to_label(&self, index: usize) -> Option<&str> {
        self.class_names.get(index).map(String::as_str)
    }

    /// 設定情報をログに出力
    pub fn print_info(&self) {
        log::info!("=== 推論設定 ===");
        for index in 0..self.num_classes() {
            if let Some(label) = self.class_index_to_label(index) {
                log::info!("  出力 {}: {}", index, label);
            }
        }
        log::info!("モデル入力サイズ: {}x{}", self.image_size, self.image_size);
        log::info!("総クラス数: {}", self.num_classes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::model_storage;
    use tempfile::TempDir;

    #[test]
    fn test_index_label_mapping_follows_artifact_order() {
        let dir = TempDir::new().unwrap();
        let metadata = ModelMetadata::new(
            vec!["nv".to_string(), "mel".to_string(), "bcc".to_string()],
            64,
            128,
            1,
            10,
            2,
        );
        let path = model_storage::save_model_with_metadata(
            &dir.path().join("classifier.tar.gz"),
            &metadata,
            &[0u8; 4],
        )
        .unwrap();

        let config = InferenceConfig::from_metadata(&model_storage::load_metadata(&path).unwrap());
        assert_eq!(config.num_classes(), 3);
        assert_eq!(config.image_size, 64);
        assert_eq!(config.class_index_to_label(1), Some("mel"));
        assert_eq!(config.class_index_to_label(3), None);
        assert_eq!(config.class_index_to_label(2), Some("bcc"));
    }
}
