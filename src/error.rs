use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum LogError {
    #[error("persistence failed: {0}")]
    Persistence(String),
    #[error("log api rejected request ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("log api unreachable: {0}")]
    Transport(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("logging disabled by policy: {0}")]
    Disabled(&'static str),
}

impl LogError {
    pub fn persistence<S: Into<String>>(msg: S) -> Self {
        Self::Persistence(msg.into())
    }

    /// Whether retrying the same write later has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            LogError::Transport(_) => true,
            LogError::Api { status, .. } => *status >= 500 || *status == 429,
            LogError::Persistence(msg) => is_transient_message(msg),
            LogError::Serialization(_) | LogError::Disabled(_) => false,
        }
    }
}

fn is_transient_message(s: &str) -> bool {
    s.contains("connection") || s.contains("timeout") || s.contains("timed out") || s.contains("broken pipe")
}

pub fn classify_sink_error<E: std::fmt::Display>(e: &E) -> LogError {
    LogError::Persistence(e.to_string())
}

impl From<serde_json::Error> for LogError {
    fn from(e: serde_json::Error) -> Self {
        LogError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for LogError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            LogError::Serialization(e.to_string())
        } else {
            LogError::Transport(e.to_string())
        }
    }
}

impl From<sqlx::Error> for LogError {
    fn from(e: sqlx::Error) -> Self {
        classify_sink_error(&e)
    }
}
