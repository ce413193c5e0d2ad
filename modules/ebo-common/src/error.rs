use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    #[error("Invalid hex identifier: {0}")]
    InvalidHexId(String),

    #[error("Invalid CAIP-2 chain id: {0}")]
    InvalidChainId(String),

    #[error("Unknown dispute status code: {0}")]
    UnknownDisputeStatus(u8),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
