//! Hard safety contract: nothing in this crate is allowed to reach the
//! network. Every URL used to talk to the embedding/chat subprocess is
//! checked here first, regardless of how it was constructed.

use crate::InferenceError;

/// Refuses any address whose authority is not `127.0.0.1` or
/// `localhost`. This is deliberately strict rather than clever: no DNS
/// resolution, no allowlist of "trusted" remote hosts.
pub fn enforce_loopback(url: &str) -> Result<(), InferenceError> {
    let authority = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url);
    let host_port = authority.split('/').next().unwrap_or(authority);

    if host_port.starts_with("127.0.0.1:") || host_port.starts_with("localhost:") {
        return Ok(());
    }

    Err(InferenceError::SecurityViolation(format!(
        "refusing non-loopback address: {url}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_loopback_forms() {
        assert!(enforce_loopback("http://127.0.0.1:8086/health").is_ok());
        assert!(enforce_loopback("http://localhost:8086/embedding").is_ok());
    }

    #[test]
    fn rejects_remote_host() {
        let err = enforce_loopback("http://example.com:8086/health").unwrap_err();
        assert!(err.to_string().contains("security violation") || matches!(err, InferenceError::SecurityViolation(_)));
    }

    #[test]
    fn rejects_wildcard_bind_address() {
        assert!(enforce_loopback("http://0.0.0.0:8086/health").is_err());
    }

    #[test]
    fn rejects_bare_host_with_no_port() {
        assert!(enforce_loopback("http://127.0.0.1/health").is_err());
        assert!(enforce_loopback("http://localhost/health").is_err());
    }
}
