use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("http client error: {0}")]
    Client(String),

    #[error("dns failure: {0}")]
    Dns(String),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("connect timeout")]
    ConnectTimeout,

    #[error("request timeout")]
    RequestTimeout,

    #[error("too many redirects")]
    RedirectLoop,

    #[error("http error {status}")]
    Http {
        status: reqwest::StatusCode,
        retriable: bool,
    },

    #[error("unreachable after {attempts} attempts: {last}")]
    Unreachable { attempts: u32, last: String },

    #[error("body too large ({0} bytes)")]
    BodyTooLarge(u64),

    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("unknown: {0}")]
    Unknown(String),
}

impl FetchError {
    pub fn should_retry(&self) -> bool {
        match self {
            // Fatal errors - don't retry
            Self::InvalidUrl(_) => false,
            Self::Client(_) => false,
            Self::BodyTooLarge(_) => false,
            Self::UnsupportedContentType(_) => false,
            Self::Unreachable { .. } => false,
            Self::Http { retriable, .. } => *retriable,

            // Temporary errors - retry
            Self::Dns(_) => true,
            Self::Tls(_) => true,
            Self::ConnectTimeout => true,
            Self::RequestTimeout => true,
            Self::RedirectLoop => true,
            Self::Io(_) => true,
            Self::Unknown(_) => true,
        }
    }

    /// Failures below the HTTP layer. Exhausting retries on one of these
    /// turns it into [`FetchError::Unreachable`].
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Dns(_)
                | Self::Tls(_)
                | Self::ConnectTimeout
                | Self::RequestTimeout
                | Self::RedirectLoop
                | Self::Io(_)
                | Self::Unknown(_)
        )
    }

    pub fn from_reqwest_error(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            if err.is_connect() {
                Self::ConnectTimeout
            } else {
                Self::RequestTimeout
            }
        } else if err.is_redirect() {
            Self::RedirectLoop
        } else if let Some(status) = err.status() {
            Self::Http {
                status,
                retriable: status.is_server_error(),
            }
        } else if err.is_connect() || err.is_request() {
            // DNS, connection refused, reset
            Self::Dns(err.to_string())
        } else if err.is_body() || err.is_decode() {
            Self::Io(err.to_string())
        } else {
            Self::Unknown(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_retry_client_errors_do_not() {
        let server = FetchError::Http {
            status: reqwest::StatusCode::BAD_GATEWAY,
            retriable: true,
        };
        let client = FetchError::Http {
            status: reqwest::StatusCode::NOT_FOUND,
            retriable: false,
        };
        assert!(server.should_retry());
        assert!(!client.should_retry());
        assert!(!server.is_transport());
    }

    #[test]
    fn unreachable_is_terminal() {
        let err = FetchError::Unreachable {
            attempts: 3,
            last: "connect timeout".to_string(),
        };
        assert!(!err.should_retry());
        assert_eq!(
            err.to_string(),
            "unreachable after 3 attempts: connect timeout"
        );
    }
}
