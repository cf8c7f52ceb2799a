//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、データセットの配置、モデル・学習設定、リスク判定の閾値を
//! JSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 計算デバイスの種類
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Cpu
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// データセット配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSettings {
    /// データセットのルートディレクトリ
    pub data_dir: PathBuf,
    /// メタデータCSVのファイル名
    pub metadata_file: String,
    /// 画像ディレクトリ（先に書かれた方を優先して探す）
    pub image_dirs: [String; 2],
    /// 画像ファイルの拡張子
    pub image_extension: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            metadata_file: "HAM10000_metadata.csv".to_string(),
            image_dirs: [
                "HAM10000_images_part_1".to_string(),
                "HAM10000_images_part_2".to_string(),
            ],
            image_extension: "jpg".to_string(),
        }
    }
}

impl DataSettings {
    /// 指定ディレクトリを使う設定
    pub fn with_data_dir<P: AsRef<Path>>(&self, data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..self.clone()
        }
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join(&self.metadata_file)
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// 学習済みモデル（重み + クラス名）の保存先
    pub artifact_path: PathBuf,
    /// 入力画像サイズ（正方形）
    pub image_size: usize,
    /// 分類ヘッドの中間層ユニット数
    pub hidden_units: usize,
    /// プーリング直後のドロップアウト率
    pub feature_dropout: f64,
    /// 中間層後のドロップアウト率
    pub hidden_dropout: f64,
    /// ImageNet学習済み特徴抽出器の重み（torchvision mobilenet_v2 の .pth）
    #[serde(default)]
    pub backbone_weights: Option<PathBuf>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            artifact_path: PathBuf::from("models/skin_lesion_classifier.tar.gz"),
            image_size: 224,
            hidden_units: 128,
            feature_dropout: 0.2,
            hidden_dropout: 0.5,
            backbone_weights: Some(PathBuf::from("models/mobilenet_v2-b0353104.pth")),
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習率
    pub learning_rate: f64,
    /// ランダムシード（サンプリング・分割・シャッフル共通）
    pub seed: u64,
    /// トレーニングデータの割合
    pub train_ratio: f32,
    /// クラスごとの最大サンプル数
    pub max_per_class: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 5,
            batch_size: 16,
            learning_rate: 1e-4,
            seed: 42,
            train_ratio: 0.8,
            max_per_class: 100,
        }
    }
}

/// リスク判定の閾値
///
/// 臨床的に検証された値ではなく、表示用の設定値
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskThresholds {
    /// メラノーマを高リスクとする確信度
    pub melanoma_high: f64,
    /// 基底細胞癌を高リスクとする確信度
    pub basal_cell_high: f64,
    /// 日光角化症を中リスクとする確信度
    pub actinic_keratosis_moderate: f64,
    /// 良性クラスを低リスクとする確信度
    pub benign_low_risk: f64,
    /// 中リスクとする確信度（これ未満は低確信度）
    pub moderate: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            melanoma_high: 0.3,
            basal_cell_high: 0.4,
            actinic_keratosis_moderate: 0.4,
            benign_low_risk: 0.7,
            moderate: 0.5,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// データセット配置
    #[serde(default)]
    pub data: DataSettings,
    /// モデル設定
    pub model: ModelSettings,
    /// トレーニング設定
    pub training: TrainingSettings,
    /// リスク判定の閾値
    #[serde(default)]
    pub risk: RiskThresholds,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 設定を読み込む、存在しないか壊れている場合はデフォルト設定を返す
    pub fn load_or_default_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    log::info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!(
                        "設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            }
        } else {
            log::info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// デフォルトパスから設定を読み込む
    pub fn load_or_default() -> Self {
        Self::load_or_default_from(Self::default_path())
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 計算デバイスを設定
    pub fn set_device_type(&mut self, device_type: DeviceType) {
        self.device_type = device_type;
    }

    /// 設定情報をログに出力
    pub fn display(&self) {
        log::info!("=== アプリケーション設定 ===");
        log::info!("計算デバイス: {}", self.device_type);
        log::info!("データディレクトリ: {}", self.data.data_dir.display());
        log::info!("モデル保存先: {}", self.model.artifact_path.display());
        log::info!("入力サイズ: {}x{}", self.model.image_size, self.model.image_size);
        log::info!(
            "エポック数: {}, バッチサイズ: {}, 学習率: {}",
            self.training.num_epochs,
            self.training.batch_size,
            self.training.learning_rate
        );
        log::info!("クラスごとの上限: {}", self.training.max_per_class);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device_type, DeviceType::Cpu);
        assert_eq!(config.model.image_size, 224);
        assert_eq!(config.training.num_epochs, 5);
        assert_eq!(config.training.batch_size, 16);
        assert_eq!(config.training.max_per_class, 100);
        assert_eq!(config.risk.melanoma_high, 0.3);
        assert_eq!(
            config.data.metadata_path(),
            PathBuf::from("data").join("HAM10000_metadata.csv")
        );
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.device_type, deserialized.device_type);
        assert_eq!(config.model.hidden_units, deserialized.model.hidden_units);
        assert_eq!(config.risk, deserialized.risk);
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
    }

    #[test]
    fn test_load_or_default_falls_back_on_broken_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let config = AppConfig::load_or_default_from(&path);
        assert_eq!(config.training.seed, 42);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let mut config = AppConfig::default();
        config.set_device_type(DeviceType::Wgpu);
        config.training.max_per_class = 20;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.device_type, DeviceType::Wgpu);
        assert_eq!(loaded.training.max_per_class, 20);
    }

    #[test]
    fn test_with_data_dir_keeps_layout() {
        let data = DataSettings::default().with_data_dir("/tmp/ham");
        assert_eq!(data.data_dir, PathBuf::from("/tmp/ham"));
        assert_eq!(data.image_dirs[0], "HAM10000_images_part_1");
    }
}
