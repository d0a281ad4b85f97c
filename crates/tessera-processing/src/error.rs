use std::time::Duration;

use tessera_core::AppError;

/// Failure of an external tool or a native extractor.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{0} is not installed")]
    NotInstalled(String),

    #[error("{tool} timed out after {}s", timeout.as_secs())]
    Timeout { tool: String, timeout: Duration },

    #[error("{tool} cancelled")]
    Cancelled { tool: String },

    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("invalid tool invocation: {0}")]
    InvalidInput(String),

    #[error("failed to parse {tool} output: {message}")]
    Parse { tool: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ToolError::Cancelled { .. })
    }

    pub(crate) fn parse(tool: &str, message: impl ToString) -> Self {
        ToolError::Parse {
            tool: tool.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<ToolError> for AppError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::Cancelled { .. } => AppError::Cancelled,
            other => AppError::Extractor(other.to_string()),
        }
    }
}

pub type ToolResult<T> = Result<T, ToolError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::ErrorMetadata;

    #[test]
    fn test_cancel_maps_to_cancelled() {
        let err: AppError = ToolError::Cancelled {
            tool: "whisper".into(),
        }
        .into();
        assert!(matches!(err, AppError::Cancelled));
    }

    #[test]
    fn test_timeout_maps_to_extractor() {
        let err: AppError = ToolError::Timeout {
            tool: "tesseract".into(),
            timeout: Duration::from_secs(5),
        }
        .into();
        assert_eq!(err.error_code(), "extractor");
        assert!(err.detail().contains("timed out after 5s"));
    }
}
