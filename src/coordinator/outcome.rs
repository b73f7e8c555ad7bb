use chrono::{DateTime, Utc};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Result of the most recent send attempt. Exactly one outcome is
/// retained; there is no history.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Success {
        status_code: u16,
        response_body: String,
        at: DateTime<Utc>,
    },
    Failure {
        error: String,
        at: DateTime<Utc>,
    },
}

impl SendOutcome {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            SendOutcome::Success { at, .. } | SendOutcome::Failure { at, .. } => *at,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SendOutcome::Success { .. })
    }

    /// User-readable status line for display surfaces.
    pub fn status_text(&self) -> String {
        match self {
            SendOutcome::Success {
                status_code, at, ..
            } => format!("Sent @ {} (HTTP {})", at.format(TIME_FORMAT), status_code),
            SendOutcome::Failure { error, at } => {
                format!("Last attempt @ {} failed: {}", at.format(TIME_FORMAT), error)
            }
        }
    }
}
