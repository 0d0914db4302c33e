//! Shared helpers for request handling.

use axum::http::HeaderMap;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("instance domain is empty")]
    Empty,
    #[error("instance domain is not a valid host: {0}")]
    Invalid(String),
}

/// Reduce an instance domain to its canonical `host[:port]` form.
///
/// Accepts bare hosts as well as full URLs, so `https://Acme.example.com/`
/// and `acme.example.com` normalize to the same value.
pub fn normalize_instance_domain(domain: &str) -> Result<String, DomainError> {
    let domain = domain.trim();
    if domain.is_empty() {
        return Err(DomainError::Empty);
    }

    let with_scheme = if domain.contains("://") {
        domain.to_string()
    } else {
        format!("https://{}", domain)
    };
    let url = Url::parse(&with_scheme).map_err(|e| DomainError::Invalid(e.to_string()))?;

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| DomainError::Invalid(domain.to_string()))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Extract client IP address and user-agent from request headers for audit
/// logging. Prefers `x-forwarded-for` over `x-real-ip`.
pub fn extract_request_info(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let ip = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    (ip, user_agent)
}
