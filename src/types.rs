use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// デモモードで使用するクラス一覧（HAM10000 の診断コード）
pub const DEMO_CLASS_NAMES: [&str; 7] = ["akiec", "bcc", "bkl", "df", "mel", "nv", "vasc"];

/// メタデータCSVの1行
///
/// 年齢・性別・部位は読み込むだけで分類には使用しない
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    #[serde(default)]
    pub lesion_id: String,
    pub image_id: String,
    /// 診断クラスコード（例: "nv", "mel"）
    pub dx: String,
    #[serde(default)]
    pub dx_type: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub age: Option<f32>,
    #[serde(default)]
    pub sex: String,
    #[serde(default)]
    pub localization: String,
}

/// クラス名 <-> 整数インデックスの対応
///
/// `fit` はラベルを辞書順に並べるため、同じラベル集合からは常に同じ順序が得られる
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    /// 観測されたラベルの重複を除いてエンコーダを構築
    pub fn fit<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let classes: BTreeSet<String> = labels
            .into_iter()
            .map(|label| label.as_ref().to_string())
            .collect();

        Self {
            classes: classes.into_iter().collect(),
        }
    }

    pub fn encode(&self, label: &str) -> Option<usize> {
        self.classes.iter().position(|c| c == label)
    }

    pub fn decode(&self, index: usize) -> Option<&str> {
        self.classes.get(index).map(String::as_str)
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// 推論結果（クラス名 -> 確率）
///
/// 値の合計は常に1。表示順が必要な場合は `ranked` を使う
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    scores: HashMap<String, f64>,
}

impl Prediction {
    /// 全クラスに 1/n を割り当てた結果
    pub fn uniform(class_names: &[String]) -> Self {
        let p = 1.0 / class_names.len().max(1) as f64;
        Self {
            scores: class_names.iter().map(|name| (name.clone(), p)).collect(),
        }
    }

    /// モデル出力から結果を構築
    ///
    /// 長さ不一致・非有限値・負値・合計0の場合は `None`。
    /// 合計が1になるよう f64 で再正規化する
    pub fn from_probabilities(class_names: &[String], probabilities: &[f32]) -> Option<Self> {
        if class_names.is_empty() || class_names.len() != probabilities.len() {
            return None;
        }
        if probabilities.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return None;
        }

        let total: f64 = probabilities.iter().map(|p| *p as f64).sum();
        if total <= 0.0 {
            return None;
        }

        let scores = class_names
            .iter()
            .zip(probabilities)
            .map(|(name, p)| (name.clone(), *p as f64 / total))
            .collect();

        Some(Self { scores })
    }

    pub fn get(&self, class_name: &str) -> Option<f64> {
        self.scores.get(class_name).copied()
    }

    /// スコアの降順（同点はクラス名順）
    pub fn ranked(&self) -> Vec<(&str, f64)> {
        let mut ranked: Vec<(&str, f64)> = self
            .scores
            .iter()
            .map(|(name, score)| (name.as_str(), *score))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
    }

    /// 最もスコアの高いクラス
    pub fn top(&self) -> Option<(&str, f64)> {
        self.ranked().into_iter().next()
    }

    pub fn total(&self) -> f64 {
        self.scores.values().sum()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn scores(&self) -> &HashMap<String, f64> {
        &self.scores
    }
}
