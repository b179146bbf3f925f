use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// Label the model uses for a leaf with no disease.
pub const HEALTHY_LABEL: &str = "healthy";

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub label: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    High,
    Moderate,
    Low,
}

impl Severity {
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= 0.85 {
            Severity::High
        } else if confidence >= 0.6 {
            Severity::Moderate
        } else {
            Severity::Low
        }
    }
}

/// Outcome of a single prediction. Only an unhealthy leaf carries a severity.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnosis {
    Healthy,
    Unhealthy { disease: String, severity: Severity },
}

impl From<ClassificationResult> for Diagnosis {
    fn from(result: ClassificationResult) -> Self {
        if result.label.eq_ignore_ascii_case(HEALTHY_LABEL) {
            Diagnosis::Healthy
        } else {
            Diagnosis::Unhealthy {
                severity: Severity::from_confidence(result.confidence),
                disease: result.label,
            }
        }
    }
}

impl Serialize for Diagnosis {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Diagnosis::Healthy => {
                let mut s = serializer.serialize_struct("Diagnosis", 2)?;
                s.serialize_field("status", "Healthy")?;
                s.serialize_field("disease", &None::<String>)?;
                s.end()
            }
            Diagnosis::Unhealthy { disease, severity } => {
                let mut s = serializer.serialize_struct("Diagnosis", 3)?;
                s.serialize_field("status", "Unhealthy")?;
                s.serialize_field("disease", disease)?;
                s.serialize_field("severity", severity)?;
                s.end()
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub prediction: Diagnosis,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub labels: usize,
}
