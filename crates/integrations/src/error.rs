use thiserror::Error;

/// Failure talking to an upstream API.
///
/// The variants that matter to callers map onto response codes: rate limits
/// and exhausted credits surface as 429/402 at our own boundary.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream rejected our credentials")]
    Unauthorized,

    #[error("upstream has no record for this request")]
    NotFound,

    #[error("upstream rate limit hit")]
    RateLimited,

    #[error("upstream credits exhausted")]
    CreditsExhausted,

    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("could not decode upstream response: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Map a non-success upstream status onto the error taxonomy.
    pub fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        match status.as_u16() {
            401 | 403 => UpstreamError::Unauthorized,
            404 => UpstreamError::NotFound,
            429 => UpstreamError::RateLimited,
            402 => UpstreamError::CreditsExhausted,
            code => UpstreamError::Upstream {
                status: code,
                message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn maps_meaningful_status_codes() {
        assert!(matches!(
            UpstreamError::from_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            UpstreamError::RateLimited
        ));
        assert!(matches!(
            UpstreamError::from_status(StatusCode::PAYMENT_REQUIRED, String::new()),
            UpstreamError::CreditsExhausted
        ));
        assert!(matches!(
            UpstreamError::from_status(StatusCode::NOT_FOUND, String::new()),
            UpstreamError::NotFound
        ));
        assert!(matches!(
            UpstreamError::from_status(StatusCode::FORBIDDEN, String::new()),
            UpstreamError::Unauthorized
        ));
        assert!(matches!(
            UpstreamError::from_status(StatusCode::BAD_GATEWAY, String::new()),
            UpstreamError::Upstream { status: 502, .. }
        ));
    }
}
