use thiserror::Error;

/// Failure reported by a generative backend call
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Missing API Key. Please enter your Google Gemini API Key.")]
    MissingApiKey,

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("operation failed: {0}")]
    Operation(String),

    #[error(transparent)]
    Asset(#[from] assets::AssetError),
}

impl BackendError {
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        BackendError::InvalidResponse(msg.into())
    }

    /// Whether this failure means the credential was missing or rejected
    pub fn is_authorization(&self) -> bool {
        match self {
            BackendError::MissingApiKey => true,
            BackendError::Http { status, message } => {
                matches!(status, 401 | 403) || is_authorization_message(message)
            }
            BackendError::Operation(message) => is_authorization_message(message),
            // raw bodies carry base64 payloads and operation ids
            BackendError::Transport(_)
            | BackendError::InvalidResponse(_)
            | BackendError::Asset(_) => false,
        }
    }
}

/// Errors surfaced by the orchestrator, the video runner and the session
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing input, caught before any backend call
    #[error("{0}")]
    Validation(String),

    /// The backend rejected the credential; the action is parked for a new key
    #[error("API Key validation failed. Please provide a valid key. ({0})")]
    Authorization(String),

    /// The image edit stage failed and the run was aborted
    #[error("Failed to generate image: {0}")]
    Edit(String),

    /// Video submission, polling or download failed
    #[error("{0}")]
    Video(String),
}

impl PipelineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        PipelineError::Validation(msg.into())
    }

    pub fn is_authorization(&self) -> bool {
        matches!(self, PipelineError::Authorization(_))
    }
}

const AUTH_MARKERS: &[&str] = &[
    "api key",
    "api_key",
    "forbidden",
    "permission denied",
    "permission_denied",
    "unauthenticated",
    "unauthorized",
];

/// Message inspection used to spot revoked or invalid keys (`PERMISSION_DENIED`,
/// "API key not valid", ...). Status codes are matched on `Http::status` only.
pub fn is_authorization_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    AUTH_MARKERS.iter().any(|needle| lower.contains(needle))
}
