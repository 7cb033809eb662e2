use thiserror::Error;

/// Server-side exception reported in an `ErrorInfo` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub code: i64,
    pub type_name: String,
    pub message: String,
    pub correlation_id: Option<String>,
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.type_name, self.code, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CsomError {
    /// Object path chain does not start at a root or continues from one
    #[error("invalid object path: {0}")]
    InvalidPath(String),

    #[error("unsupported {0} parameter")]
    UnsupportedParameter(&'static str),

    #[error("failed to write request document: {0}")]
    Xml(String),

    /// Response body is not a CSOM response
    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("action {action} failed: {error}")]
    Server { action: u32, error: ServerError },

    /// Action depends on an object path whose action failed
    #[error("action {action} skipped: object path of action {failed} failed")]
    DependencyFailed { action: u32, failed: u32 },

    #[error("no response for action {action}")]
    MissingResponse { action: u32 },
}

impl CsomError {
    /// Server exception behind this error, if any
    #[must_use]
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            CsomError::Server { error, .. } => Some(error),
            _ => None,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_display() {
        let err = CsomError::Server {
            action: 7,
            error: ServerError {
                code: -2_147_024_809,
                type_name: "System.ArgumentException".to_owned(),
                message: "List does not exist.".to_owned(),
                correlation_id: None,
            },
        };
        assert_eq!(
            err.to_string(),
            "action 7 failed: System.ArgumentException (-2147024809): List does not exist."
        );
        assert_eq!(err.server_error().map(|e| e.code), Some(-2_147_024_809));
        assert!(CsomError::MissingResponse { action: 1 }.server_error().is_none());
    }
}
