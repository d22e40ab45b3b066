//! Error taxonomy for the engine.

use thiserror::Error;

/// All errors generated by the engine's feed and dispatch paths.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    Socket(String),

    #[error("malformed feed payload: {0}")]
    Parse(String),
}

impl EngineError {
    /// Determine if a feed error requires the stream to re-initialise.
    ///
    /// Parse errors are per-message and never terminal: the offending update
    /// is dropped and ingestion continues.
    pub fn is_terminal(&self) -> bool {
        match self {
            EngineError::Socket(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("terminated")
                    || lower.contains("connectionclosed")
                    || lower.contains("alreadyclosed")
                    || lower.contains("io(")
                    || lower.contains("timeout")
            }
            EngineError::Http(_) | EngineError::Parse(_) => false,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for EngineError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(value.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value.to_string())
    }
}
