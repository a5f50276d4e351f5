//! Component-local error types (spec §7). Errors never cross a component
//! boundary as an exception — they're reported via these typed enums and
//! either recovered in-place (reconnect, retry) or turned into a counter.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingEnvVar(&'static str),
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("failed to build gRPC client: {0}")]
    ClientBuild(String),
    #[error("failed to connect to stream endpoint: {0}")]
    Connect(String),
    #[error("failed to write subscription request: {0}")]
    Send(String),
    #[error("stream ended")]
    StreamEnded,
    #[error("stream reported an error: {0}")]
    StreamError(String),
}

#[derive(Debug, Error)]
pub enum EmissionError {
    #[error("journal write failed: {0}")]
    Journal(#[from] std::io::Error),
    #[error("sink request failed: {0}")]
    Sink(String),
}

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("metadata fallback request failed: {0}")]
    Request(String),
    #[error("metadata fallback response was malformed: {0}")]
    Malformed(String),
}
