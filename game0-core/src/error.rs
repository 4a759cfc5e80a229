use thiserror::Error;

/// Core error type for game0.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum Game0Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("endpoint unavailable: {endpoint}")]
    EndpointUnavailable { endpoint: String },

    #[error("endpoint {endpoint} answered {code}: {message}")]
    EndpointStatus {
        endpoint: String,
        code: String,
        message: String,
    },

    #[error("endpoint {endpoint} returned no body")]
    MissingBody { endpoint: String },

    #[error("upstream stream error: {message}")]
    Upstream { message: String },

    #[error("prompt '{name}' could not be loaded: {message}")]
    Prompt { name: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Game0Error {
    /// Short, stable classification used in logs and telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::EndpointUnavailable { .. }
            | Self::EndpointStatus { .. }
            | Self::MissingBody { .. } => "transport",
            Self::Upstream { .. } => "upstream",
            Self::Prompt { .. } => "prompt",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, Game0Error>;
