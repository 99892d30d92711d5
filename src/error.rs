use derive_more::{Display, From};

/// Why a fetch produced no series.
#[derive(Debug, Display, From)]
pub enum FetchError {
    #[display(fmt = "transport error: {}", _0)]
    Transport(reqwest::Error),
    #[display(fmt = "upstream returned status {}: {}", status, message)]
    #[from(ignore)]
    Status { status: u16, message: String },
    #[display(fmt = "upstream reported: {}", _0)]
    #[from(ignore)]
    Upstream(String),
    #[display(fmt = "unreadable response: {}", _0)]
    #[from(ignore)]
    Parse(String),
    #[display(fmt = "io error: {}", _0)]
    Io(std::io::Error),
    #[display(fmt = "csv error: {}", _0)]
    Csv(csv::Error),
    #[display(fmt = "no rows in range")]
    #[from(ignore)]
    Empty,
}

impl std::error::Error for FetchError {}

impl FetchError {
    /// Only transport hiccups and 5xx/429 answers are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Parse(e.to_string())
    }
}

impl From<chrono::ParseError> for FetchError {
    fn from(e: chrono::ParseError) -> Self {
        FetchError::Parse(e.to_string())
    }
}

impl From<std::num::ParseFloatError> for FetchError {
    fn from(e: std::num::ParseFloatError) -> Self {
        FetchError::Parse(e.to_string())
    }
}
