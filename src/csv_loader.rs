//! HAM10000 メタデータCSVの読み込み

use crate::model::DataSettings;
use crate::types::{LabelEncoder, MetadataRecord};
use anyhow::{Context, Result};
use csv::ReaderBuilder;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// 読み込み済みメタデータとラベルエンコーダ
#[derive(Debug, Clone)]
pub struct LesionMetadata {
    records: Vec<MetadataRecord>,
    encoder: LabelEncoder,
}

impl LesionMetadata {
    /// レコード列から構築（image_id が重複する行は最初の1行のみ残す）
    pub fn from_records(records: Vec<MetadataRecord>) -> Self {
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(records.len());
        for record in records {
            if seen.insert(record.image_id.clone()) {
                unique.push(record);
            } else {
                log::warn!("image_id が重複しています。後の行を無視します: {}", record.image_id);
            }
        }

        let encoder = LabelEncoder::fit(unique.iter().map(|r| r.dx.as_str()));
        Self {
            records: unique,
            encoder,
        }
    }

    pub fn records(&self) -> &[MetadataRecord] {
        &self.records
    }

    pub fn encoder(&self) -> &LabelEncoder {
        &self.encoder
    }

    pub fn class_names(&self) -> &[String] {
        self.encoder.classes()
    }

    pub fn label_of(&self, record: &MetadataRecord) -> Option<usize> {
        self.encoder.encode(&record.dx)
    }

    /// 出現順のクラス一覧
    pub fn classes_in_order_of_appearance(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.records
            .iter()
            .map(|r| r.dx.as_str())
            .filter(|dx| seen.insert(*dx))
            .collect()
    }

    /// クラスごとの件数（件数の多い順）
    pub fn class_distribution(&self) -> Vec<(String, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for record in &self.records {
            *counts.entry(record.dx.as_str()).or_insert(0) += 1;
        }
        let mut counts: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(dx, n)| (dx.to_string(), n))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// CSVを読み込んでレコード列を返す
pub fn read_metadata_csv(path: &Path) -> Result<Vec<MetadataRecord>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open metadata CSV: {}", path.display()))?;

    let mut records = Vec::new();
    for (line, result) in reader.deserialize().enumerate() {
        let record: MetadataRecord = result
            .with_context(|| format!("Invalid metadata row {} in {}", line + 2, path.display()))?;
        records.push(record);
    }

    Ok(records)
}

/// データディレクトリからメタデータを読み込む
///
/// ファイルが無い・読めない場合はログを出して `None` を返す（呼び出し側はデモモードへ）
pub fn load_metadata(data: &DataSettings) -> Option<LesionMetadata> {
    let path = data.metadata_path();
    if !path.exists() {
        log::warn!("データセットが見つかりません: {}", path.display());
        return None;
    }

    let records = match read_metadata_csv(&path) {
        Ok(records) => records,
        Err(e) => {
            log::warn!("メタデータの読み込みに失敗しました: {:#}", e);
            return None;
        }
    };

    let metadata = LesionMetadata::from_records(records);
    if metadata.is_empty() {
        log::warn!("メタデータにレコードがありません: {}", path.display());
        return None;
    }

    log::info!("データセット読み込み: {} 枚", metadata.len());
    log::info!("クラス分布:");
    for (dx, count) in metadata.class_distribution() {
        log::info!("  {}: {}", dx, count);
    }

    Some(metadata)
}
