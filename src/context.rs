//! アプリケーションコンテキスト
//!
//! 設定と分類器を1つにまとめ、分類要求を順に処理します。

use anyhow::{Context, Result};
use burn::tensor::backend::Backend;
use chrono::{DateTime, Local};
use image::DynamicImage;
use std::path::Path;

use crate::ml::SkinLesionModel;
use crate::model::AppConfig;
use crate::report::{assess_risk, render_report, ImageDetails, PatientDetails, ReportInput, RiskAssessment};
use crate::types::Prediction;

/// 1回分の分類要求
pub struct ClassificationRequest {
    pub image: DynamicImage,
    pub file_name: String,
    pub file_size: u64,
    pub patient: PatientDetails,
}

impl ClassificationRequest {
    /// 画像ファイルから要求を作る
    pub fn from_path(path: &Path, patient: PatientDetails) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read image: {}", path.display()))?;
        let image = image::load_from_memory(&bytes)
            .with_context(|| format!("Failed to decode image: {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            image,
            file_name,
            file_size: bytes.len() as u64,
            patient,
        })
    }
}

/// 分類結果（要求ごとに作られ、要求と共に破棄される）
#[derive(Debug, Clone)]
pub struct ClassificationReport {
    pub file_name: String,
    pub prediction: Prediction,
    pub assessment: RiskAssessment,
    pub image: ImageDetails,
    pub patient: PatientDetails,
    pub generated_at: DateTime<Local>,
}

impl ClassificationReport {
    pub fn to_html(&self) -> String {
        render_report(&ReportInput {
            file_name: &self.file_name,
            prediction: &self.prediction,
            assessment: &self.assessment,
            image: &self.image,
            patient: &self.patient,
            generated_at: self.generated_at,
        })
    }
}

/// 設定と分類器
pub struct AppContext<B: Backend> {
    pub config: AppConfig,
    pub classifier: SkinLesionModel<B>,
}

impl<B: Backend> AppContext<B> {
    /// 設定に従って分類器を構築
    pub fn new(config: AppConfig, use_real_data: bool, device: &B::Device) -> Self {
        let data_dir = config.data.data_dir.clone();
        let classifier = SkinLesionModel::new(&config, &data_dir, use_real_data, device);
        log::info!(
            "分類器の準備完了: {} / {} クラス",
            classifier.state(),
            classifier.class_names().len()
        );

        Self { config, classifier }
    }

    /// 構築済みの分類器を使う
    pub fn with_classifier(config: AppConfig, classifier: SkinLesionModel<B>) -> Self {
        Self { config, classifier }
    }

    /// 画像を分類してリスク判定付きの結果を返す
    pub fn classify(&self, request: ClassificationRequest) -> Result<ClassificationReport> {
        let prediction = self.classifier.predict(&request.image);
        let assessment = assess_risk(&prediction, &self.config.risk)
            .context("分類器にクラスがありません")?;
        let image = ImageDetails::from_image(&request.image, request.file_size);

        Ok(ClassificationReport {
            file_name: request.file_name,
            prediction,
            assessment,
            image,
            patient: request.patient,
            generated_at: Local::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{ClassifierState, ProbabilityModel};
    use crate::report::RiskLevel;
    use burn_ndarray::NdArray;
    use image::RgbImage;
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    struct FixedModel;

    impl ProbabilityModel for FixedModel {
        fn image_size(&self) -> usize {
            8
        }

        fn predict_probabilities(&self, _pixels: &[f32]) -> Result<Vec<f32>> {
            Ok(vec![0.1, 0.8, 0.1])
        }
    }

    fn context() -> AppContext<TestBackend> {
        let classifier = SkinLesionModel::<TestBackend>::from_predictor(
            ClassifierState::Loaded,
            vec!["bcc".to_string(), "mel".to_string(), "nv".to_string()],
            Box::new(FixedModel),
        );
        AppContext::with_classifier(AppConfig::default(), classifier)
    }

    #[test]
    fn test_classify_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lesion.png");
        RgbImage::new(100, 80).save(&path).unwrap();

        let patient = PatientDetails {
            name: Some("Test".to_string()),
            ..PatientDetails::default()
        };
        let request = ClassificationRequest::from_path(&path, patient).unwrap();
        let report = context().classify(request).unwrap();

        assert_eq!(report.file_name, "lesion.png");
        assert_eq!(report.assessment.diagnosis, "mel");
        assert_eq!(report.assessment.level, RiskLevel::High);
        assert_eq!(report.image.width, 100);
        assert!(report.image.file_size > 0);
        assert!(report.to_html().contains("Melanoma"));
    }

    #[test]
    fn test_undecodable_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image").unwrap();

        assert!(ClassificationRequest::from_path(&path, PatientDetails::default()).is_err());
    }
}
