use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("could not determine a home directory for the config file")]
    NoHomeDir,

    #[error("config io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed parsing config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("config validation error: {0}")]
    Validation(String),
}

/// Failure of one repository's pull-request request. Cloned into the task
/// registry so the error stays visible until the task expires.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("request for repository {repository} failed: {message}")]
    Transport { repository: String, message: String },

    #[error("repository {repository} returned HTTP {status}: {body}")]
    Status {
        repository: String,
        status: u16,
        body: String,
    },

    #[error("decoding response for repository {repository}: {message}")]
    Decode { repository: String, message: String },
}

impl FetchError {
    pub fn repository(&self) -> &str {
        match self {
            Self::Transport { repository, .. }
            | Self::Status { repository, .. }
            | Self::Decode { repository, .. } => repository,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_names_repository() {
        let err = FetchError::Status {
            repository: "repo-a".to_string(),
            status: 401,
            body: "unauthorized".to_string(),
        };
        assert_eq!(err.repository(), "repo-a");
        assert_eq!(
            err.to_string(),
            "repository repo-a returned HTTP 401: unauthorized"
        );
    }
}
