//! Error types for rostrum.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RostrumError {
    #[error("Blueprint error: {0}")]
    Blueprint(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("ACP error: {0}")]
    Acp(String),

    #[error("Furniture error: {0}")]
    Furniture(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RostrumError>;
