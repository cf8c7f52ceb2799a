pub mod risk;
pub mod html;

pub use risk::{
    assess_risk, clinical_significance, display_name, AlertClass, ImageDetails, ImageQuality,
    PatientDetails, RiskAssessment, RiskLevel,
};
pub use html::{escape_html, render_report, ReportInput};
