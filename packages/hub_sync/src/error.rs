use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("server is unavailable")]
    Unavailable,

    #[error("request failed ({status}): {message}")]
    Status { status: u16, message: String },

    #[error(transparent)]
    Http(reqwest::Error),
}

impl ApiError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable
        } else {
            Self::Http(err)
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("invalid server url {url:?}: expected http:// or https://")]
    ServerUrl { url: String },

    #[error("could not determine a data directory; pass --data-dir")]
    NoDataDir,

    #[error("failed to create data directory {path:?}: {source}")]
    DataDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_display() {
        assert_eq!(ApiError::Unavailable.to_string(), "server is unavailable");
    }

    #[test]
    fn status_display_includes_server_message() {
        let err = ApiError::Status {
            status: 409,
            message: "session is currently streaming".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "request failed (409): session is currently streaming"
        );
    }

    #[tokio::test]
    async fn from_reqwest_connect_error_yields_unavailable() {
        // Port 1 is reserved and nothing listens on it
        let err = reqwest::get("http://127.0.0.1:1/nope").await.unwrap_err();
        assert!(err.is_connect(), "expected a connect error, got: {err}");
        assert!(ApiError::from_reqwest(err).is_unavailable());
    }
}
