use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unsupported spreadsheet format: {0}")]
    Format(String),
    #[error("no usable rows found in {0}")]
    EmptyFile(String),
    #[error("{0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Excel(#[from] calamine::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("unparseable model reply: {0}")]
    Parse(String),
}

impl AppError {
    /// Rate limiting and temporary unavailability; worth another attempt after backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Upstream { status, message } => {
                matches!(status, 429 | 503) || mentions_quota(message)
            }
            AppError::Http(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err
                        .status()
                        .is_some_and(|status| matches!(status.as_u16(), 429 | 503))
            }
            _ => false,
        }
    }
}

fn mentions_quota(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("quota") || lowered.contains("429")
}
