//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルの重みとクラス名一覧を1ファイルに統合して保存・読み込みします。
//! 重みとクラス名は必ず対で扱い、片方だけを読み込むことはありません。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラス名、入力サイズなど）
//! - model.bin       - モデルの重み（バイナリ）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

use crate::error::ArtifactError;
use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// 保存先パスを tar.gz に揃える
pub fn artifact_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    }
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 一時ファイルに書き出してから置き換えるため、途中で失敗しても既存の対は壊れない
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    metadata.validate()?;
    let tar_gz_path = artifact_path(output_path);

    // 親ディレクトリが存在しない場合は作成
    if let Some(parent) = tar_gz_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create parent directory: {:?}", parent))?;
        }
    }

    let temp_path = tar_gz_path.with_extension("gz.tmp");
    let tar_gz_file = File::create(&temp_path)
        .context(format!("Failed to create tar.gz file: {:?}", temp_path))?;

    // Gzip圧縮を設定
    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    // メタデータをJSONとして追加
    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;

    // モデルバイナリを追加
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    // tarアーカイブを完成させる
    let encoder = tar_builder
        .into_inner()
        .context("Failed to finalize tar archive")?;
    encoder
        .finish()
        .context("Failed to finalize tar.gz archive")?;

    std::fs::rename(&temp_path, &tar_gz_path)
        .context(format!("Failed to move artifact into place: {:?}", tar_gz_path))?;

    Ok(tar_gz_path)
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, data)
        .context(format!("Failed to add {} to tar", name))?;
    Ok(())
}

fn open_archive(tar_gz_path: &Path) -> Result<Archive<GzDecoder<File>>> {
    if !tar_gz_path.is_file() {
        return Err(ArtifactError::Missing(tar_gz_path.to_path_buf()).into());
    }
    let tar_gz_file = File::open(tar_gz_path)
        .context(format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;
    Ok(Archive::new(GzDecoder::new(tar_gz_file)))
}

fn corrupt(e: impl std::fmt::Display) -> anyhow::Error {
    ArtifactError::Corrupt(e.to_string()).into()
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let mut archive = open_archive(tar_gz_path)?;

    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let path = entry.path().map_err(corrupt)?;

        if path.to_str() == Some(METADATA_ENTRY) {
            let mut json_str = String::new();
            entry.read_to_string(&mut json_str).map_err(corrupt)?;
            let metadata = ModelMetadata::from_json_string(&json_str)?;
            metadata.validate()?;
            return Ok(metadata);
        }
    }

    Err(corrupt("metadata.json not found in tar.gz archive"))
}

/// Tar.gzからモデルバイナリを読み込む
pub fn load_model_binary(tar_gz_path: &Path) -> Result<Vec<u8>> {
    let mut archive = open_archive(tar_gz_path)?;

    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let path = entry.path().map_err(corrupt)?;

        if path.to_str() == Some(MODEL_ENTRY) {
            let mut buffer = Vec::new();
            entry.read_to_end(&mut buffer).map_err(corrupt)?;
            return Ok(buffer);
        }
    }

    Err(corrupt("model.bin not found in tar.gz archive"))
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let mut archive = open_archive(tar_gz_path)?;

    let mut metadata_opt: Option<ModelMetadata> = None;
    let mut model_binary_opt: Option<Vec<u8>> = None;

    // 両方のファイルを読み込む
    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let path = entry.path().map_err(corrupt)?;

        match path.to_str() {
            Some(METADATA_ENTRY) => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str).map_err(corrupt)?;
                metadata_opt = Some(ModelMetadata::from_json_string(&json_str)?);
            }
            Some(MODEL_ENTRY) => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer).map_err(corrupt)?;
                model_binary_opt = Some(buffer);
            }
            _ => {}
        }
    }

    match (metadata_opt, model_binary_opt) {
        (Some(metadata), Some(binary)) => {
            metadata.validate()?;
            Ok((metadata, binary))
        }
        (None, _) => Err(corrupt("metadata.json not found in tar.gz archive")),
        (_, None) => Err(corrupt("model.bin not found in tar.gz archive")),
    }
}

/// メタデータをログに出力
pub fn print_metadata_info(metadata: &ModelMetadata) {
    log::info!("=== モデルメタデータ ===");
    log::info!("クラス ({}): {}", metadata.num_classes, metadata.class_names.join(", "));
    log::info!("モデル入力サイズ: {}x{}", metadata.image_size, metadata.image_size);
    log::info!("特徴抽出器: {} / 中間層: {}", metadata.backbone, metadata.hidden_units);
    log::info!("学習エポック数: {}", metadata.num_epochs);
    log::info!(
        "学習/検証枚数: {} / {}",
        metadata.num_train_samples,
        metadata.num_validation_samples
    );
    log::info!("学習日時: {}", metadata.trained_at);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_metadata() -> ModelMetadata {
        let classes = ["akiec", "bcc", "bkl", "df", "mel", "nv", "vasc"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        ModelMetadata::new(classes, 224, 128, 5, 560, 140)
    }

    #[test]
    fn test_save_and_load_pair() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("models/classifier");
        let binary = vec![1u8, 2, 3, 4, 5];

        let saved = save_model_with_metadata(&path, &sample_metadata(), &binary).unwrap();
        assert_eq!(saved, dir.path().join("models/classifier.tar.gz"));

        let (metadata, loaded) = load_model_with_metadata(&saved).unwrap();
        assert_eq!(metadata.class_names, sample_metadata().class_names);
        assert_eq!(loaded, binary);
        assert_eq!(load_model_binary(&saved).unwrap(), binary);
        assert_eq!(load_metadata(&saved).unwrap().num_classes, 7);
    }

    #[test]
    fn test_missing_artifact() {
        let dir = TempDir::new().unwrap();
        let err = load_model_with_metadata(&dir.path().join("none.tar.gz")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ArtifactError>(),
            Some(ArtifactError::Missing(_))
        ));
    }

    #[test]
    fn test_corrupt_artifact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.tar.gz");
        std::fs::write(&path, b"definitely not gzip").unwrap();

        let err = load_model_with_metadata(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ArtifactError>(),
            Some(ArtifactError::Corrupt(_))
        ));
    }

    #[test]
    fn test_invalid_metadata_is_not_saved() {
        let dir = TempDir::new().unwrap();
        let mut metadata = sample_metadata();
        metadata.num_classes = 3;

        assert!(save_model_with_metadata(&dir.path().join("m.tar.gz"), &metadata, &[0]).is_err());
        assert!(!dir.path().join("m.tar.gz").exists());
    }
}
