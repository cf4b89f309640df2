/// Errors surfaced by the API client.
#[derive(Debug)]
pub enum ClientError {
    /// The request never produced a response (network, TLS, timeout)
    Http(reqwest::Error),
    /// The configured base URL or a request path could not be joined
    InvalidUrl(url::ParseError),
    /// A response body was not the expected JSON shape
    Decode(serde_json::Error),
    /// The server answered with a non-success status
    Api {
        status: u16,
        message: String,
        code: Option<String>,
    },
    /// The session could not be recovered; the user must log in again
    SessionExpired,
}

impl ClientError {
    /// HTTP status for `Api` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Http(e) => write!(f, "HTTP request failed: {}", e),
            ClientError::InvalidUrl(e) => write!(f, "Invalid URL: {}", e),
            ClientError::Decode(e) => write!(f, "Unexpected response body: {}", e),
            ClientError::Api {
                status, message, ..
            } => write!(f, "API error ({}): {}", status, message),
            ClientError::SessionExpired => write!(f, "Session expired, please log in again"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Http(e) => Some(e),
            ClientError::InvalidUrl(e) => Some(e),
            ClientError::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Http(e)
    }
}

impl From<url::ParseError> for ClientError {
    fn from(e: url::ParseError) -> Self {
        ClientError::InvalidUrl(e)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e)
    }
}
