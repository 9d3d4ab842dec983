//! Crate-wide error type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Text generation or reply parsing.
    #[error("Inference error: {0}")]
    Inference(String),

    /// OCR or ASR.
    #[error("Recognition error: {0}")]
    Recognition(String),

    /// ffmpeg, ffprobe or image decoding.
    #[error("Media error: {0}")]
    Media(String),

    #[error("Index error: {0}")]
    Index(String),

    /// None of the requested subjects has a usable vector index.
    #[error("No valid index: {0}")]
    NoValidIndex(String),

    /// The orchestrator was shut down.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Request error: {0}")]
    Request(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("video 42".to_string());
        assert_eq!(err.to_string(), "Not found: video 42");
    }

    #[test]
    fn test_error_display_media() {
        let err = Error::Media("ffmpeg exited with 1".to_string());
        assert_eq!(err.to_string(), "Media error: ffmpeg exited with 1");
    }

    #[test]
    fn test_error_display_no_valid_index() {
        let err = Error::NoValidIndex("2 subjects requested".to_string());
        assert_eq!(err.to_string(), "No valid index: 2 subjects requested");
    }

    #[test]
    fn test_error_display_recognition() {
        let err = Error::Recognition("tesseract missing".to_string());
        assert_eq!(err.to_string(), "Recognition error: tesseract missing");
    }

    #[test]
    fn test_error_display_orchestrator() {
        let err = Error::Orchestrator("shut down".to_string());
        assert_eq!(err.to_string(), "Orchestrator error: shut down");
    }

    #[test]
    fn test_error_display_inference() {
        let err = Error::Inference("model timeout".to_string());
        assert_eq!(err.to_string(), "Inference error: model timeout");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
        assert!(err.to_string().starts_with("Serialization error:"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.to_string(), "I/O error: no such file");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }

    #[test]
    fn test_result_type_err() {
        let result: Result<()> = Err(Error::Config("missing".to_string()));
        assert!(result.is_err());
    }
}
