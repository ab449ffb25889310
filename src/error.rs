//! Error types for the geocoding engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GeocodeError>;

#[derive(Error, Debug)]
pub enum GeocodeError {
    #[error("Node not found: {0}")]
    NodeNotFound(u32),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid dataset format: {0}")]
    InvalidFormat(String),

    #[error("Index build error: {0}")]
    IndexBuild(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Trie error: {0}")]
    Trie(#[from] fst::Error),
}
