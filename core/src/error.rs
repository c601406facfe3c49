//! Error types for the bot core

use thiserror::Error;

/// Main error type for the bot
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    
    #[error("Configuration error: {0}")]
    Config(String),
    
    #[error("Protocol client error: {0}")]
    Protocol(String),
    
    #[error("Persistence error: {0}")]
    Persistence(String),
    
    #[error("Session error: {0}")]
    Session(String),
    
    #[error("Operation timed out: {0}")]
    Timeout(String),
    
    #[error("Command error: {0}")]
    Command(String),
    
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    
    #[error("Generic error: {0}")]
    Generic(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Generic(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Generic(s)
    }
}
