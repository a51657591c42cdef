use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("missing environment variable: {0}")]
    MissingEnv(&'static str),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to read credentials file: {0}")]
    CredentialsRead(std::io::Error),
    #[error("invalid credentials: {0}")]
    Credentials(String),
    #[error("failed to sign token assertion: {0}")]
    TokenSigning(jsonwebtoken::errors::Error),
    #[error("token exchange failed with status {status}: {body}")]
    TokenExchange { status: StatusCode, body: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{method} {url} returned {status}: {body}")]
    Api {
        method: reqwest::Method,
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("failed to decode response: {0}")]
    Decode(serde_json::Error),
    #[error("operation {name} failed with code {code}: {message}")]
    Operation {
        name: String,
        code: i32,
        message: String,
    },
    #[error("operation {name} did not finish after {polls} polls")]
    OperationTimeout { name: String, polls: u32 },
    #[error("failed to read fixture file: {0}")]
    FixtureRead(std::io::Error),
}

impl CloudError {
    /// Status code returned by the remote API, if this error came from one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            CloudError::Api { status, .. } => Some(*status),
            CloudError::Transport(e) => e.status(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }
}

pub type CloudResult<T> = std::result::Result<T, CloudError>;
