//! Retry decision for 401 responses.
//!
//! Only a 401 whose body looks like an expired or unauthorized token is retried,
//! and only once per request. Any other 401 fails fast so unrelated authorization
//! problems are not masked as token expiry.

use reqwest::StatusCode;
use serde_json::Value;

/// Error codes that identify an expired or unauthorized access token.
const AUTH_FAILURE_CODES: &[&str] = &[
    "token_expired",
    "expired_token",
    "access_token_expired",
    "unauthorized",
    "invalid_token",
];

/// Top-level body fields that may carry the error code.
const AUTH_FAILURE_FIELDS: &[&str] = &["error", "code", "error_code"];

fn is_auth_failure_code(code: &str) -> bool {
    let code = code.trim();
    AUTH_FAILURE_CODES
        .iter()
        .any(|known| known.eq_ignore_ascii_case(code))
}

/// Check if a response body matches the expired-token / unauthorized shape.
///
/// Accepts `{"error": "token_expired"}`, `{"code": "unauthorized"}`,
/// `{"error_code": ...}` and `{"error": {"code": ...}}`.
pub fn is_auth_failure_body(body: &[u8]) -> bool {
    let Ok(Value::Object(document)) = serde_json::from_slice::<Value>(body) else {
        return false;
    };

    AUTH_FAILURE_FIELDS
        .iter()
        .filter_map(|field| document.get(*field))
        .any(|value| match value {
            Value::String(code) => is_auth_failure_code(code),
            Value::Object(nested) => nested
                .get("code")
                .and_then(Value::as_str)
                .is_some_and(is_auth_failure_code),
            _ => false,
        })
}

/// Decide whether a failed request should be retried after a token refresh.
///
/// `retry_count` is the number of times this request was already retried.
pub fn should_retry(retry_count: u32, status: StatusCode, body: &[u8]) -> bool {
    status == StatusCode::UNAUTHORIZED && retry_count == 0 && is_auth_failure_body(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(r#"{"error":"token_expired"}"#)]
    #[case(r#"{"error":"Unauthorized"}"#)]
    #[case(r#"{"code":"expired_token","message":"x"}"#)]
    #[case(r#"{"error_code":"invalid_token"}"#)]
    #[case(r#"{"error":{"code":"access_token_expired","detail":"x"}}"#)]
    fn test_matching_shapes(#[case] body: &str) {
        assert!(is_auth_failure_body(body.as_bytes()));
        assert!(should_retry(0, StatusCode::UNAUTHORIZED, body.as_bytes()));
    }

    #[rstest]
    #[case(r#"{"error":"insufficient_scope"}"#)]
    #[case(r#"{"message":"token_expired"}"#)]
    #[case(r#"{"error":401}"#)]
    #[case(r#"["token_expired"]"#)]
    #[case("token_expired")]
    #[case("")]
    fn test_non_matching_shapes(#[case] body: &str) {
        assert!(!is_auth_failure_body(body.as_bytes()));
        assert!(!should_retry(0, StatusCode::UNAUTHORIZED, body.as_bytes()));
    }

    #[test]
    fn test_never_retries_twice() {
        let body = br#"{"error":"token_expired"}"#;
        assert!(should_retry(0, StatusCode::UNAUTHORIZED, body));
        assert!(!should_retry(1, StatusCode::UNAUTHORIZED, body));
        assert!(!should_retry(2, StatusCode::UNAUTHORIZED, body));
    }

    #[test]
    fn test_only_401_is_retried() {
        let body = br#"{"error":"unauthorized"}"#;
        assert!(!should_retry(0, StatusCode::FORBIDDEN, body));
        assert!(!should_retry(0, StatusCode::OK, body));
        assert!(!should_retry(0, StatusCode::INTERNAL_SERVER_ERROR, body));
    }
}
