//! Shared error types for the dispatch fabric

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Serialization failed: {message}")]
    SerializationError { message: String },

    #[error("Deserialization failed: {message}")]
    DeserializationError { message: String },

    #[error("Frame of {size} bytes exceeds the frame size limit")]
    FrameTooLarge { size: usize },

    #[error("Message protocol error: {message}")]
    ProtocolError { message: String },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type SharedResult<T> = Result<T, SharedError>;
