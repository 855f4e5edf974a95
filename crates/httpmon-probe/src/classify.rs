use httpmon_common::types::ResultKind;

/// Classifies one probe outcome. Total over its input domain; the decision
/// order is fixed:
///
/// 1. transport error (timeout, ssl, connection, unknown)
/// 2. 401
/// 3. 5xx
/// 4. status mismatch
/// 5. latency ceiling
/// 6. success
pub fn classify(
    expected_status: u16,
    actual_status: u16,
    latency_ms: u64,
    max_latency_ms: Option<u32>,
    transport_error: Option<&str>,
) -> ResultKind {
    if let Some(error) = transport_error {
        let text = error.to_lowercase();
        if text.contains("timeout") {
            return ResultKind::Timeout;
        }
        if text.contains("ssl") || text.contains("certificate") {
            return ResultKind::SslError;
        }
        if text.contains("connection") || text.contains("refused") {
            return ResultKind::ConnectionError;
        }
        return ResultKind::UnknownError;
    }

    if actual_status == 401 {
        return ResultKind::AuthFailure;
    }

    if actual_status >= 500 {
        return ResultKind::ServerError;
    }

    if actual_status != expected_status {
        return ResultKind::StatusMismatch;
    }

    if let Some(max) = max_latency_ms {
        if latency_ms > max as u64 {
            return ResultKind::LatencyBreach;
        }
    }

    ResultKind::Success
}

/// Human-readable failure description stored on the check result.
pub fn describe_failure(kind: ResultKind, actual_status: u16, expected_status: u16) -> String {
    match kind {
        ResultKind::StatusMismatch => {
            format!("Expected status {expected_status} but got {actual_status}")
        }
        ResultKind::AuthFailure => "Authentication failed (401 Unauthorized)".to_string(),
        ResultKind::ServerError => format!("Server error: HTTP {actual_status}"),
        ResultKind::LatencyBreach => "Response time exceeded threshold".to_string(),
        _ => format!("Check failed with status {actual_status}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_wins_over_everything() {
        assert_eq!(
            classify(200, 200, 10, None, Some("connect timeout reached")),
            ResultKind::Timeout
        );
        assert_eq!(
            classify(200, 401, 10, None, Some("ssl handshake failed")),
            ResultKind::SslError
        );
        assert_eq!(
            classify(200, 500, 10, None, Some("certificate has expired")),
            ResultKind::SslError
        );
        assert_eq!(
            classify(200, 0, 10, None, Some("connection refused")),
            ResultKind::ConnectionError
        );
        assert_eq!(
            classify(200, 0, 10, None, Some("dns name does not exist")),
            ResultKind::UnknownError
        );
    }

    #[test]
    fn auth_failure_wins_over_status_mismatch() {
        // 401 with expected 200 is AUTH_FAILURE, not STATUS_MISMATCH
        assert_eq!(classify(200, 401, 50, Some(100), None), ResultKind::AuthFailure);
    }

    #[test]
    fn server_error_wins_over_status_mismatch() {
        assert_eq!(classify(200, 500, 10, None, None), ResultKind::ServerError);
        assert_eq!(classify(200, 503, 10, None, None), ResultKind::ServerError);
        // Even when 5xx is the expected status
        assert_eq!(classify(500, 500, 10, None, None), ResultKind::ServerError);
    }

    #[test]
    fn status_mismatch() {
        assert_eq!(classify(200, 404, 10, None, None), ResultKind::StatusMismatch);
        assert_eq!(classify(201, 200, 10, None, None), ResultKind::StatusMismatch);
    }

    #[test]
    fn latency_breach_wins_over_success() {
        assert_eq!(
            classify(200, 200, 500, Some(400), None),
            ResultKind::LatencyBreach
        );
        // At the ceiling is not a breach
        assert_eq!(classify(200, 200, 400, Some(400), None), ResultKind::Success);
        // No ceiling configured
        assert_eq!(classify(200, 200, 99999, None, None), ResultKind::Success);
    }

    #[test]
    fn success() {
        assert_eq!(classify(200, 200, 50, Some(100), None), ResultKind::Success);
        assert_eq!(classify(204, 204, 50, None, None), ResultKind::Success);
    }

    #[test]
    fn failure_descriptions() {
        assert_eq!(
            describe_failure(ResultKind::StatusMismatch, 404, 200),
            "Expected status 200 but got 404"
        );
        assert_eq!(
            describe_failure(ResultKind::ServerError, 502, 200),
            "Server error: HTTP 502"
        );
    }
}
