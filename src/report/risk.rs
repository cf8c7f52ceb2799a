//! 診断名の表示・臨床的意義・リスク判定
//!
//! 閾値は `RiskThresholds` で設定する。臨床的に検証された基準ではない。

use image::DynamicImage;
use serde::Serialize;
use std::fmt;

use crate::model::RiskThresholds;
use crate::types::Prediction;

/// 良性とみなす診断コード
const BENIGN_CODES: [&str; 4] = ["nv", "bkl", "df", "vasc"];

/// この辺長以上なら画質十分とみなす
pub const MIN_QUALITY_SIDE: u32 = 224;

/// 診断コードの表示名（未知のコードはそのまま返す）
pub fn display_name(code: &str) -> &str {
    match code {
        "akiec" => "Actinic Keratosis",
        "bcc" => "Basal Cell Carcinoma",
        "bkl" => "Benign Keratosis",
        "df" => "Dermatofibroma",
        "mel" => "Melanoma",
        "nv" => "Nevus (Common Mole)",
        "vasc" => "Vascular Lesion",
        other => other,
    }
}

/// 診断コードの臨床的意義
pub fn clinical_significance(code: &str) -> &'static str {
    match code {
        "nv" | "bkl" | "df" | "vasc" => "Benign",
        "mel" => "Malignant - Urgent",
        "bcc" => "Malignant - Monitor",
        "akiec" => "Pre-malignant",
        _ => "Unknown",
    }
}

/// リスク区分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RiskLevel {
    High,
    Moderate,
    Low,
    LowConfidence,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::High => write!(f, "High Risk"),
            RiskLevel::Moderate => write!(f, "Moderate Risk"),
            RiskLevel::Low => write!(f, "Low Risk"),
            RiskLevel::LowConfidence => write!(f, "Low Confidence"),
        }
    }
}

/// 表示の強調色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertClass {
    Success,
    Warning,
    Danger,
}

impl AlertClass {
    /// CSS クラス名
    pub fn css_class(&self) -> &'static str {
        match self {
            AlertClass::Success => "alert-success",
            AlertClass::Warning => "alert-warning",
            AlertClass::Danger => "alert-danger",
        }
    }
}

/// 第一診断に対するリスク判定
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    /// 診断コード
    pub diagnosis: String,
    pub confidence: f64,
    pub level: RiskLevel,
    pub alert: AlertClass,
    pub recommendation: &'static str,
}

impl RiskAssessment {
    pub fn display_name(&self) -> &str {
        display_name(&self.diagnosis)
    }
}

/// 最も確率の高いクラスについてリスクを判定
///
/// 予測が空なら `None`
pub fn assess_risk(prediction: &Prediction, thresholds: &RiskThresholds) -> Option<RiskAssessment> {
    let (diagnosis, confidence) = prediction.top()?;

    let (level, alert, recommendation) = match diagnosis {
        "mel" if confidence >= thresholds.melanoma_high => (
            RiskLevel::High,
            AlertClass::Danger,
            "Immediate medical evaluation required - possible melanoma",
        ),
        "bcc" if confidence >= thresholds.basal_cell_high => (
            RiskLevel::High,
            AlertClass::Danger,
            "Medical evaluation required - possible skin cancer",
        ),
        "akiec" if confidence >= thresholds.actinic_keratosis_moderate => (
            RiskLevel::Moderate,
            AlertClass::Warning,
            "Dermatologist consultation advised - pre-malignant condition",
        ),
        code if BENIGN_CODES.contains(&code) => {
            if confidence >= thresholds.benign_low_risk {
                (
                    RiskLevel::Low,
                    AlertClass::Success,
                    "Routine monitoring recommended - likely benign",
                )
            } else if confidence >= thresholds.moderate {
                (
                    RiskLevel::Moderate,
                    AlertClass::Warning,
                    "Consider dermatologist consultation for confirmation",
                )
            } else {
                (
                    RiskLevel::LowConfidence,
                    AlertClass::Warning,
                    "Low confidence result - consider clinical examination for peace of mind",
                )
            }
        }
        _ if confidence >= thresholds.moderate => (
            RiskLevel::Moderate,
            AlertClass::Warning,
            "Dermatologist consultation recommended for proper evaluation",
        ),
        _ => (
            RiskLevel::LowConfidence,
            AlertClass::Warning,
            "Inconclusive results - clinical examination recommended",
        ),
    };

    Some(RiskAssessment {
        diagnosis: diagnosis.to_string(),
        confidence,
        level,
        alert,
        recommendation,
    })
}

/// 画質判定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImageQuality {
    Excellent,
    Suboptimal,
}

impl fmt::Display for ImageQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageQuality::Excellent => write!(f, "Excellent"),
            ImageQuality::Suboptimal => write!(f, "Suboptimal"),
        }
    }
}

/// 入力画像の情報
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageDetails {
    pub width: u32,
    pub height: u32,
    pub file_size: u64,
    pub quality: ImageQuality,
}

impl ImageDetails {
    pub fn from_image(image: &DynamicImage, file_size: u64) -> Self {
        let (width, height) = (image.width(), image.height());
        let quality = if width >= MIN_QUALITY_SIDE && height >= MIN_QUALITY_SIDE {
            ImageQuality::Excellent
        } else {
            ImageQuality::Suboptimal
        };

        Self {
            width,
            height,
            file_size,
            quality,
        }
    }

    pub fn dimensions(&self) -> String {
        format!("{}x{} pixels", self.width, self.height)
    }

    pub fn file_size_mb(&self) -> f64 {
        self.file_size as f64 / (1024.0 * 1024.0)
    }
}

/// 患者情報（1回の分類要求の間だけ保持する）
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatientDetails {
    pub name: Option<String>,
    pub id: Option<String>,
    pub age: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use rstest::rstest;

    fn prediction(top: &str, confidence: f32) -> Prediction {
        let names: Vec<String> = ["akiec", "bcc", "bkl", "df", "mel", "nv", "vasc"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let rest = (1.0 - confidence) / (names.len() - 1) as f32;
        let probabilities: Vec<f32> = names
            .iter()
            .map(|n| if n == top { confidence } else { rest })
            .collect();
        Prediction::from_probabilities(&names, &probabilities).unwrap()
    }

    #[rstest]
    #[case("mel", 0.35, RiskLevel::High, AlertClass::Danger)]
    #[case("mel", 0.25, RiskLevel::LowConfidence, AlertClass::Warning)]
    #[case("bcc", 0.45, RiskLevel::High, AlertClass::Danger)]
    #[case("akiec", 0.45, RiskLevel::Moderate, AlertClass::Warning)]
    #[case("nv", 0.8, RiskLevel::Low, AlertClass::Success)]
    #[case("bkl", 0.6, RiskLevel::Moderate, AlertClass::Warning)]
    #[case("vasc", 0.3, RiskLevel::LowConfidence, AlertClass::Warning)]
    #[case("akiec", 0.35, RiskLevel::LowConfidence, AlertClass::Warning)]
    fn test_risk_rules(
        #[case] top: &str,
        #[case] confidence: f32,
        #[case] level: RiskLevel,
        #[case] alert: AlertClass,
    ) {
        let assessment = assess_risk(&prediction(top, confidence), &RiskThresholds::default()).unwrap();
        assert_eq!(assessment.diagnosis, top);
        assert_eq!(assessment.level, level);
        assert_eq!(assessment.alert, alert);
    }

    #[test]
    fn test_unknown_class_uses_generic_rule() {
        let names = vec!["other".to_string(), "nv".to_string()];
        let p = Prediction::from_probabilities(&names, &[0.6, 0.4]).unwrap();
        let assessment = assess_risk(&p, &RiskThresholds::default()).unwrap();

        assert_eq!(assessment.level, RiskLevel::Moderate);
        assert_eq!(assessment.display_name(), "other");
        assert_eq!(clinical_significance("other"), "Unknown");
    }

    #[test]
    fn test_thresholds_are_configurable() {
        let thresholds = RiskThresholds {
            melanoma_high: 0.9,
            ..RiskThresholds::default()
        };
        let assessment = assess_risk(&prediction("mel", 0.55), &thresholds).unwrap();
        assert_eq!(assessment.level, RiskLevel::Moderate);
    }

    #[test]
    fn test_display_names_and_significance() {
        assert_eq!(display_name("nv"), "Nevus (Common Mole)");
        assert_eq!(display_name("mel"), "Melanoma");
        assert_eq!(clinical_significance("mel"), "Malignant - Urgent");
        assert_eq!(clinical_significance("bkl"), "Benign");
        assert_eq!(format!("{}", RiskLevel::LowConfidence), "Low Confidence");
    }

    #[rstest]
    #[case(224, 224, ImageQuality::Excellent)]
    #[case(600, 450, ImageQuality::Excellent)]
    #[case(223, 500, ImageQuality::Suboptimal)]
    fn test_image_quality(#[case] width: u32, #[case] height: u32, #[case] quality: ImageQuality) {
        let image = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let details = ImageDetails::from_image(&image, 2 * 1024 * 1024);

        assert_eq!(details.quality, quality);
        assert!((details.file_size_mb() - 2.0).abs() < 1e-9);
    }
}
