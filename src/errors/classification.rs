use super::types::ScanError;

#[derive(Debug, Clone)]
pub struct ErrorClassification {
    pub error_type: &'static str,
    pub retryable: bool,
}

impl ScanError {
    /// Classify this error to determine its type and whether it can be retried.
    pub fn classify(&self) -> ErrorClassification {
        match self {
            // Retryable errors
            ScanError::Persistence(_) => ErrorClassification {
                error_type: "PersistenceFailure",
                retryable: true,
            },
            ScanError::PartialWrite(_) => ErrorClassification {
                error_type: "PartialWriteFailure",
                retryable: true,
            },
            ScanError::Engine(_) => ErrorClassification {
                error_type: "EngineError",
                retryable: true,
            },
            ScanError::Timeout(_) => ErrorClassification {
                error_type: "TimeoutError",
                retryable: true,
            },
            ScanError::Io(_) => ErrorClassification {
                error_type: "IoError",
                retryable: true,
            },

            // Non-retryable errors
            ScanError::InvalidInput(_) => ErrorClassification {
                error_type: "InvalidInput",
                retryable: false,
            },
            ScanError::Unauthorized(_) => ErrorClassification {
                error_type: "Unauthorized",
                retryable: false,
            },
            ScanError::Forbidden(_) => ErrorClassification {
                error_type: "Forbidden",
                retryable: false,
            },
            ScanError::NotFound(_) => ErrorClassification {
                error_type: "NotFound",
                retryable: false,
            },
            ScanError::Conflict(_) => ErrorClassification {
                error_type: "Conflict",
                retryable: false,
            },
            ScanError::Unsupported(_) => ErrorClassification {
                error_type: "Unsupported",
                retryable: false,
            },
            ScanError::Config(_) => ErrorClassification {
                error_type: "ConfigError",
                retryable: false,
            },
            ScanError::Json(_) => ErrorClassification {
                error_type: "JsonError",
                retryable: false,
            },
            ScanError::Yaml(_) => ErrorClassification {
                error_type: "YamlError",
                retryable: false,
            },
            ScanError::Internal(_) => ErrorClassification {
                error_type: "InternalError",
                retryable: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_is_retryable() {
        let err = ScanError::Persistence("database is locked".into());
        let class = err.classify();
        assert!(class.retryable);
        assert_eq!(class.error_type, "PersistenceFailure");
    }

    #[test]
    fn test_partial_write_is_retryable() {
        let err = ScanError::PartialWrite("findings insert failed".into());
        assert!(err.classify().retryable);
        assert_eq!(err.classify().error_type, "PartialWriteFailure");
    }

    #[test]
    fn test_invalid_input_not_retryable() {
        let err = ScanError::InvalidInput("bad url".into());
        let class = err.classify();
        assert!(!class.retryable);
        assert_eq!(class.error_type, "InvalidInput");
    }

    #[test]
    fn test_conflict_not_retryable() {
        let err = ScanError::Conflict("scan already completed".into());
        assert!(!err.classify().retryable);
    }

    #[test]
    fn test_engine_retryable() {
        let err = ScanError::Engine("target unreachable".into());
        assert!(err.classify().retryable);
    }

    #[test]
    fn test_unauthorized_not_retryable() {
        let err = ScanError::Unauthorized("missing token".into());
        assert!(!err.classify().retryable);
    }
}
