//! 分類結果の HTML レポート

use chrono::{DateTime, Local};
use std::fmt::Write as _;

use crate::report::risk::{clinical_significance, display_name, ImageDetails, PatientDetails, RiskAssessment};
use crate::types::Prediction;

const DISCLAIMER: &str = "Disclaimer: This report is for informational purposes only and does not \
constitute medical advice. Always consult a qualified healthcare professional for medical \
diagnosis and treatment.";

const STYLE: &str = r#"
        body { font-family: sans-serif; margin: 20px; color: #333; line-height: 1.6; }
        .header { background-color: #1e40af; color: white; padding: 20px; text-align: center; border-radius: 8px; margin-bottom: 30px; }
        .section-title { color: #1e40af; border-bottom: 2px solid #3b82f6; padding-bottom: 5px; margin-top: 30px; }
        .data-point { margin-bottom: 8px; }
        .alert-box { padding: 15px; border-radius: 8px; margin-top: 20px; }
        .alert-success { background-color: #d1fae5; border: 1px solid #a7f3d0; color: #065f46; }
        .alert-warning { background-color: #fef3c7; border: 1px solid #fed7aa; color: #9a3412; }
        .alert-danger { background-color: #fecaca; border: 1px solid #fca5a5; color: #991b1b; }
        table { width: 100%; border-collapse: collapse; margin-top: 15px; }
        th, td { border: 1px solid #e2e8f0; padding: 10px; text-align: left; }
        th { background-color: #f1f5f9; }
        .footer { text-align: center; margin-top: 50px; font-size: 0.8em; color: #666; }
"#;

/// レポートに載せる内容
pub struct ReportInput<'a> {
    pub file_name: &'a str,
    pub prediction: &'a Prediction,
    pub assessment: &'a RiskAssessment,
    pub image: &'a ImageDetails,
    pub patient: &'a PatientDetails,
    pub generated_at: DateTime<Local>,
}

/// HTML の特殊文字をエスケープ
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn percent(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

fn or_na(value: Option<&str>) -> String {
    value.map(escape_html).unwrap_or_else(|| "N/A".to_string())
}

/// レポートを生成
pub fn render_report(input: &ReportInput<'_>) -> String {
    let mut html = String::new();
    let patient = input.patient;
    let age = patient.age.map(|a| a.to_string());

    // String への書き込みは失敗しない
    let _ = write!(
        html,
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Skin Lesion AI Diagnosis Report</title>
    <style>{style}</style>
</head>
<body>
    <div class="header">
        <h1>Skin Lesion AI Diagnosis Report</h1>
    </div>

    <h2 class="section-title">Patient &amp; Image Information</h2>
    <div class="data-point"><strong>Patient Name:</strong> {name}</div>
    <div class="data-point"><strong>Patient ID:</strong> {id}</div>
    <div class="data-point"><strong>Patient Age:</strong> {age}</div>
    <div class="data-point"><strong>Image File:</strong> {file}</div>
    <div class="data-point"><strong>Image Dimensions:</strong> {dimensions}</div>
    <div class="data-point"><strong>Report Generated:</strong> {date}</div>
    <div class="data-point"><strong>Image Quality Assessment:</strong> {quality}</div>

    <h2 class="section-title">Primary AI Diagnosis</h2>
    <div class="alert-box {alert}">
        <div class="data-point"><strong>Diagnosis:</strong> {diagnosis}</div>
        <div class="data-point"><strong>Confidence Level:</strong> {confidence}</div>
        <div class="data-point"><strong>Risk Assessment:</strong> {risk}</div>
        <div class="data-point"><strong>Recommendation:</strong> {recommendation}</div>
    </div>

    <h2 class="section-title">Detailed Confidence Breakdown</h2>
    <table>
        <thead>
            <tr><th>Diagnosis</th><th>Confidence</th><th>Clinical Significance</th></tr>
        </thead>
        <tbody>
"#,
        style = STYLE,
        name = or_na(patient.name.as_deref()),
        id = or_na(patient.id.as_deref()),
        age = or_na(age.as_deref()),
        file = escape_html(input.file_name),
        dimensions = input.image.dimensions(),
        date = input.generated_at.format("%B %d, %Y at %I:%M %p"),
        quality = input.image.quality,
        alert = input.assessment.alert.css_class(),
        diagnosis = escape_html(input.assessment.display_name()),
        confidence = percent(input.assessment.confidence),
        risk = input.assessment.level,
        recommendation = escape_html(input.assessment.recommendation),
    );

    for (code, score) in input.prediction.ranked() {
        let _ = writeln!(
            html,
            "            <tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(display_name(code)),
            percent(score),
            clinical_significance(code)
        );
    }

    let _ = write!(
        html,
        r#"        </tbody>
    </table>

    <div class="footer">
        <p>{}</p>
    </div>
</body>
</html>
"#,
        DISCLAIMER
    );

    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RiskThresholds;
    use crate::report::risk::assess_risk;
    use image::{DynamicImage, RgbImage};

    fn render(patient: &PatientDetails, file_name: &str) -> String {
        let names: Vec<String> = ["mel", "nv", "bkl"].iter().map(|s| s.to_string()).collect();
        let prediction = Prediction::from_probabilities(&names, &[0.15, 0.75, 0.1]).unwrap();
        let assessment = assess_risk(&prediction, &RiskThresholds::default()).unwrap();
        let image = ImageDetails::from_image(&DynamicImage::ImageRgb8(RgbImage::new(300, 300)), 1024);

        render_report(&ReportInput {
            file_name,
            prediction: &prediction,
            assessment: &assessment,
            image: &image,
            patient,
            generated_at: Local::now(),
        })
    }

    #[test]
    fn test_report_contains_sorted_breakdown() {
        let html = render(&PatientDetails::default(), "lesion.jpg");

        let nv = html.find("<td>Nevus (Common Mole)</td>").unwrap();
        let mel = html.find("<td>Melanoma</td>").unwrap();
        let bkl = html.find("<td>Benign Keratosis</td>").unwrap();
        assert!(nv < mel && mel < bkl);
        assert!(html.contains("75.0%"));
        assert!(html.contains("Low Risk"));
        assert!(html.contains("alert-success"));
        assert!(html.contains("Patient Name:</strong> N/A"));
        assert!(html.contains("Disclaimer"));
    }

    #[test]
    fn test_user_text_is_escaped() {
        let patient = PatientDetails {
            name: Some("<script>alert(1)</script>".to_string()),
            id: Some("A&B".to_string()),
            age: Some(42),
        };
        let html = render(&patient, "\"x\".jpg");

        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("A&amp;B"));
        assert!(html.contains("&quot;x&quot;.jpg"));
        assert!(html.contains("Patient Age:</strong> 42"));
    }
}
