use serde::Serialize;

use crate::anomaly::AnomalyResult;
use crate::error::Result;
use crate::llm::agents::report::AiReport;

pub use crate::anomaly::AnomalyRequest;
pub use crate::llm::agents::report::ReportRequest;

/// JSON envelope for an anomaly check.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnomalyResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// JSON envelope for a generated report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<AiReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnomalyResponse {
    /// Envelope plus HTTP-style status for an operation outcome.
    pub fn from_result(outcome: Result<AnomalyResult>) -> (u16, Self) {
        match outcome {
            Ok(result) => (
                200,
                Self {
                    success: true,
                    result: Some(result),
                    error: None,
                },
            ),
            Err(e) => (
                e.status_code(),
                Self {
                    success: false,
                    result: None,
                    error: Some(e.to_string()),
                },
            ),
        }
    }
}

impl ReportResponse {
    pub fn from_result(outcome: Result<AiReport>) -> (u16, Self) {
        match outcome {
            Ok(report) => (
                200,
                Self {
                    success: true,
                    report: Some(report),
                    error: None,
                },
            ),
            Err(e) => (
                e.status_code(),
                Self {
                    success: false,
                    report: None,
                    error: Some(e.to_string()),
                },
            ),
        }
    }
}
