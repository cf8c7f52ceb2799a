use std::path::PathBuf;
use thiserror::Error;

/// 学習済みモデル（重み + クラス名）の読み込みエラー
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// ファイルが存在しない
    #[error("モデルファイルが存在しません: {0}")]
    Missing(PathBuf),

    /// アーカイブやメタデータが壊れている
    #[error("モデルファイルが壊れています: {0}")]
    Corrupt(String),

    /// クラス数や入力サイズが一致しない
    #[error("モデルとクラス一覧が一致しません: {0}")]
    Mismatch(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ArtifactError {
    fn from(e: serde_json::Error) -> Self {
        ArtifactError::Corrupt(format!("metadata.json: {}", e))
    }
}
