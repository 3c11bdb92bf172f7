use super::*;

#[derive(Debug, thiserror::Error)]
enum SampleError {
    #[error("thing not found")]
    Missing,
    #[error("upstream unavailable")]
    Upstream,
}

impl ErrorCode for SampleError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Missing => "E_MISSING",
            Self::Upstream => "E_UPSTREAM",
        }
    }

    fn http_status(&self) -> StatusCode {
        match self {
            Self::Missing => StatusCode::NOT_FOUND,
            Self::Upstream => StatusCode::BAD_GATEWAY,
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Upstream)
    }
}

#[test]
fn api_error_carries_code_status_and_message() {
    let err = ApiError::from(SampleError::Missing);
    assert_eq!(err.status, StatusCode::NOT_FOUND);
    assert_eq!(err.body.code, "E_MISSING");
    assert_eq!(err.body.message, "thing not found");
    assert!(!err.body.retryable);
}

#[test]
fn api_error_propagates_retryable_flag() {
    let err = ApiError::from(SampleError::Upstream);
    assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    assert!(err.body.retryable);
}

#[test]
fn bad_request_uses_generic_code() {
    let err = ApiError::bad_request("offset must be non-negative");
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
    assert_eq!(err.body.code, "E_BAD_REQUEST");
}

#[test]
fn error_body_serializes_flat() {
    let err = ApiError::from(SampleError::Missing);
    let json = serde_json::to_value(&err.body).unwrap();
    assert_eq!(json["code"], "E_MISSING");
    assert_eq!(json["message"], "thing not found");
    assert_eq!(json["retryable"], false);
}
