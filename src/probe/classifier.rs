//! Outcome classification — raw HTTP outcome + timing → `CheckStatus`.
//!
//! Order matters: the timeout boundary wins over any status code, then an
//! exact match with the expected status, then 5xx, then everything else.

use std::time::Duration;

use crate::model::CheckStatus;

pub const TIMEOUT_MESSAGE: &str = "Request timed out";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: CheckStatus,
    /// Populated for every non-SUCCESS outcome.
    pub error_message: Option<String>,
}

impl Classification {
    fn success() -> Self {
        Self { status: CheckStatus::Success, error_message: None }
    }

    fn with(status: CheckStatus, message: String) -> Self {
        Self { status, error_message: Some(message) }
    }
}

/// Classify a probe that received a response.
pub fn classify_response(
    status_code: u16,
    reason: Option<&str>,
    elapsed: Duration,
    expected_status: u16,
    timeout: Duration,
) -> Classification {
    if elapsed >= timeout {
        return Classification::with(CheckStatus::Timeout, TIMEOUT_MESSAGE.to_string());
    }
    if status_code == expected_status {
        return Classification::success();
    }

    let code_text = match reason {
        Some(r) if !r.is_empty() => format!("{status_code} {r}"),
        _ => status_code.to_string(),
    };
    if status_code >= 500 {
        Classification::with(CheckStatus::Error, format!("Server error: {code_text}"))
    } else {
        Classification::with(CheckStatus::Failure, format!("Unexpected status: {code_text}"))
    }
}

/// Classify a probe that never obtained a response.
pub fn classify_transport(is_timeout: bool, message: &str) -> Classification {
    if is_timeout {
        Classification::with(CheckStatus::Timeout, TIMEOUT_MESSAGE.to_string())
    } else if message.is_empty() {
        Classification::with(CheckStatus::Error, "Request failed".to_string())
    } else {
        Classification::with(CheckStatus::Error, message.to_string())
    }
}
