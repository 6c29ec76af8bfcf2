//! Agent error taxonomy.
//!
//! Every failure that reaches the run report is one of these kinds. Each kind
//! carries a stable wire code, a human message and optional details.

/// Stable status codes carried by run reports.
pub mod codes {
    pub const E_SUCCESS: &str = "E_SUCCESS";
    pub const E_INTERNAL_ERROR: &str = "E_INTERNAL_ERROR";
    pub const E_CONFIG_INVALID: &str = "E_CONFIG_INVALID";
    pub const E_FUZZER_LAUNCH_ERROR: &str = "E_FUZZER_LAUNCH_ERROR";
    pub const E_FUZZER_ABORTED: &str = "E_FUZZER_ABORTED";
    pub const E_RAM_LIMIT_EXCEEDED: &str = "E_RAM_LIMIT_EXCEEDED";
    pub const E_TMPFS_LIMIT_EXCEEDED: &str = "E_TMPFS_LIMIT_EXCEEDED";
}

const INTERNAL_MESSAGE: &str = "Internal error";

/// Which resource limit tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceLimit {
    Ram,
    Tmpfs,
    Time,
}

/// Which object-storage transfer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTransferOp {
    Download,
    Upload,
    Delete,
    Lookup,
}

/// Exhaustive classification of [`AgentError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Internal,
    ConfigInvalid,
    LaunchError,
    Aborted,
    ResourceLimitExceeded(ResourceLimit),
    FileTransfer(FileTransferOp),
}

/// Classified agent failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    #[error("[E_INTERNAL_ERROR]: Internal error")]
    Internal { details: Option<String> },

    #[error("[E_CONFIG_INVALID]: Fuzzer configuration is invalid")]
    ConfigInvalid { details: String },

    #[error("[E_FUZZER_LAUNCH_ERROR]: {message}")]
    LaunchError {
        message: String,
        details: Option<String>,
    },

    #[error("[E_FUZZER_ABORTED]: Fuzzer aborted")]
    Aborted,

    #[error("[E_RAM_LIMIT_EXCEEDED]: Ram limit exceeded")]
    RamLimitExceeded,

    #[error("[E_TMPFS_LIMIT_EXCEEDED]: No space left on tmpfs")]
    TmpfsLimitExceeded,

    /// Reported as an internal error.
    #[error("[E_INTERNAL_ERROR]: time limit exceeded")]
    TimeLimitExceeded,

    #[error("[E_INTERNAL_ERROR]: failed to download {artifact}")]
    FileDownload { artifact: String },

    #[error("[E_INTERNAL_ERROR]: failed to upload {artifact}")]
    FileUpload { artifact: String },

    #[error("[E_INTERNAL_ERROR]: failed to delete {artifact}")]
    FileDelete { artifact: String },

    #[error("[E_INTERNAL_ERROR]: {artifact} not found in storage")]
    FileLookup { artifact: String },
}

impl AgentError {
    /// Internal error without details.
    pub fn internal() -> Self {
        AgentError::Internal { details: None }
    }

    pub fn launch(message: impl Into<String>, details: Option<String>) -> Self {
        AgentError::LaunchError {
            message: message.into(),
            details,
        }
    }

    pub fn config_invalid(details: impl Into<String>) -> Self {
        AgentError::ConfigInvalid {
            details: details.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Internal { .. } => ErrorKind::Internal,
            AgentError::ConfigInvalid { .. } => ErrorKind::ConfigInvalid,
            AgentError::LaunchError { .. } => ErrorKind::LaunchError,
            AgentError::Aborted => ErrorKind::Aborted,
            AgentError::RamLimitExceeded => ErrorKind::ResourceLimitExceeded(ResourceLimit::Ram),
            AgentError::TmpfsLimitExceeded => {
                ErrorKind::ResourceLimitExceeded(ResourceLimit::Tmpfs)
            }
            AgentError::TimeLimitExceeded => ErrorKind::ResourceLimitExceeded(ResourceLimit::Time),
            AgentError::FileDownload { .. } => ErrorKind::FileTransfer(FileTransferOp::Download),
            AgentError::FileUpload { .. } => ErrorKind::FileTransfer(FileTransferOp::Upload),
            AgentError::FileDelete { .. } => ErrorKind::FileTransfer(FileTransferOp::Delete),
            AgentError::FileLookup { .. } => ErrorKind::FileTransfer(FileTransferOp::Lookup),
        }
    }

    /// Stable wire code.
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Internal
            | ErrorKind::FileTransfer(_)
            | ErrorKind::ResourceLimitExceeded(ResourceLimit::Time) => codes::E_INTERNAL_ERROR,
            ErrorKind::ConfigInvalid => codes::E_CONFIG_INVALID,
            ErrorKind::LaunchError => codes::E_FUZZER_LAUNCH_ERROR,
            ErrorKind::Aborted => codes::E_FUZZER_ABORTED,
            ErrorKind::ResourceLimitExceeded(ResourceLimit::Ram) => codes::E_RAM_LIMIT_EXCEEDED,
            ErrorKind::ResourceLimitExceeded(ResourceLimit::Tmpfs) => {
                codes::E_TMPFS_LIMIT_EXCEEDED
            }
        }
    }

    /// Human-readable message for the report.
    pub fn message(&self) -> &str {
        match self {
            AgentError::Internal { .. }
            | AgentError::FileDownload { .. }
            | AgentError::FileUpload { .. }
            | AgentError::FileDelete { .. }
            | AgentError::FileLookup { .. }
            | AgentError::TimeLimitExceeded => INTERNAL_MESSAGE,
            AgentError::ConfigInvalid { .. } => "Fuzzer configuration is invalid",
            AgentError::LaunchError { message, .. } => message,
            AgentError::Aborted => "Fuzzer aborted",
            AgentError::RamLimitExceeded => "Ram limit exceeded",
            AgentError::TmpfsLimitExceeded => "No space left on tmpfs",
        }
    }

    pub fn details(&self) -> Option<&str> {
        match self {
            AgentError::Internal { details } | AgentError::LaunchError { details, .. } => {
                details.as_deref()
            }
            AgentError::ConfigInvalid { details } => Some(details),
            AgentError::FileDownload { artifact }
            | AgentError::FileUpload { artifact }
            | AgentError::FileDelete { artifact }
            | AgentError::FileLookup { artifact } => Some(artifact),
            AgentError::Aborted
            | AgentError::RamLimitExceeded
            | AgentError::TmpfsLimitExceeded
            | AgentError::TimeLimitExceeded => None,
        }
    }

    /// Internal-family errors get logged with their full diagnostic chain.
    pub fn is_internal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Internal
                | ErrorKind::FileTransfer(_)
                | ErrorKind::ResourceLimitExceeded(ResourceLimit::Time)
        )
    }
}

/// Result type for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_error_display_carries_code() {
        assert_eq!(
            AgentError::RamLimitExceeded.to_string(),
            "[E_RAM_LIMIT_EXCEEDED]: Ram limit exceeded"
        );
        let err = AgentError::launch("Fuzzer failed on first run", None);
        assert_eq!(
            err.to_string(),
            "[E_FUZZER_LAUNCH_ERROR]: Fuzzer failed on first run"
        );
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(AgentError::internal().code(), codes::E_INTERNAL_ERROR);
        assert_eq!(AgentError::config_invalid("x").code(), codes::E_CONFIG_INVALID);
        assert_eq!(AgentError::Aborted.code(), codes::E_FUZZER_ABORTED);
        assert_eq!(AgentError::TmpfsLimitExceeded.code(), codes::E_TMPFS_LIMIT_EXCEEDED);
        assert_eq!(AgentError::TimeLimitExceeded.code(), codes::E_INTERNAL_ERROR);
        let upload = AgentError::FileUpload {
            artifact: "crash".into(),
        };
        assert_eq!(upload.code(), codes::E_INTERNAL_ERROR);
    }

    #[test]
    fn test_file_transfer_errors_are_internal_family() {
        let err = AgentError::FileLookup {
            artifact: "config".into(),
        };
        assert!(err.is_internal());
        assert_eq!(err.message(), "Internal error");
        assert_eq!(err.details(), Some("config"));
        assert_eq!(err.kind(), ErrorKind::FileTransfer(FileTransferOp::Lookup));
    }

    #[test]
    fn test_resource_limits_are_not_internal() {
        for err in [AgentError::RamLimitExceeded, AgentError::TmpfsLimitExceeded] {
            assert!(!err.is_internal());
            assert!(matches!(err.kind(), ErrorKind::ResourceLimitExceeded(_)));
            assert!(err.details().is_none());
        }
    }

    #[test]
    fn test_time_limit_reports_as_internal() {
        let err = AgentError::TimeLimitExceeded;
        assert!(err.is_internal());
        assert_eq!(err.kind(), ErrorKind::ResourceLimitExceeded(ResourceLimit::Time));
        assert_eq!(err.code(), codes::E_INTERNAL_ERROR);
        assert_eq!(err.message(), "Internal error");
        assert!(err.details().is_none());
    }

    #[test]
    fn test_launch_error_details() {
        let err = AgentError::launch("bad", Some("log tail".into()));
        assert_eq!(err.message(), "bad");
        assert_eq!(err.details(), Some("log tail"));
    }
}
