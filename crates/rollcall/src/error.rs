use rollcall_core::TemplateError;
use rollcall_hw::CaptureError;
use rollcall_store::StoreError;
use thiserror::Error;

/// Everything a session action can fail with. None of these end the session
/// or the process; the caller reports them and the user may try again.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("missing required fields: {}", .0.join(", "))]
    Validation(Vec<&'static str>),
    #[error("enrollment {0:?} is already registered")]
    DuplicateEnrollment(String),
    #[error("invalid credentials")]
    CredentialsNotFound,
    #[error("no face detected, please try again")]
    FaceNotDetected,
    #[error("face not recognized (difference {score:.1}), please try again")]
    FaceNotMatched { score: f32 },
    #[error("no user is logged in")]
    NotLoggedIn,
    #[error("face template: {0}")]
    Template(#[from] TemplateError),
    #[error("capture: {0}")]
    Capture(#[from] CaptureError),
    #[error("storage failure: {0}")]
    Storage(StoreError),
}

impl FlowError {
    /// Errors the user resolves by simply capturing again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FlowError::FaceNotDetected | FlowError::FaceNotMatched { .. })
    }
}

impl From<StoreError> for FlowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEnrollment(enrollment) => FlowError::DuplicateEnrollment(enrollment),
            other => FlowError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_enrollment_maps_to_its_own_variant() {
        let err: FlowError = StoreError::DuplicateEnrollment("E100".into()).into();
        assert!(matches!(err, FlowError::DuplicateEnrollment(ref e) if e == "E100"));
    }

    #[test]
    fn test_other_store_errors_are_storage_failures() {
        let err: FlowError = StoreError::DataDir {
            path: "/readonly".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        }
        .into();
        assert!(matches!(err, FlowError::Storage(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_validation_message_lists_fields() {
        let err = FlowError::Validation(vec!["name", "section"]);
        assert_eq!(err.to_string(), "missing required fields: name, section");
    }

    #[test]
    fn test_retryable() {
        assert!(FlowError::FaceNotDetected.is_retryable());
        assert!(FlowError::FaceNotMatched { score: 71.0 }.is_retryable());
        assert!(!FlowError::CredentialsNotFound.is_retryable());
    }
}
