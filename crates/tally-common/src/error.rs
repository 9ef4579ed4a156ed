use thiserror::Error;

#[derive(Debug, Error)]
pub enum TallyError {
    #[error("metric registration conflict: {0}")]
    RegistrationConflict(String),
    #[error("invalid observation: {0}")]
    InvalidObservation(String),
    #[error("scrape of target {target} failed: {message}")]
    ScrapeFailure { target: String, message: String },
    #[error("malformed exposition payload at line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("forward failed: {0}")]
    ForwardFailure(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("internal error: {0}")]
    InternalError(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TallyError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RegistrationConflict(_) => "RegistrationConflict",
            Self::InvalidObservation(_) => "InvalidObservation",
            Self::ScrapeFailure { .. } => "ScrapeFailure",
            Self::Parse { .. } => "MalformedPayload",
            Self::ForwardFailure(_) => "ForwardFailure",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::InternalError(_) => "InternalError",
            Self::Io(_) => "InternalError",
        }
    }

    pub fn scrape(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ScrapeFailure {
            target: target.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TallyError>;
