use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Invalid base price: {0}")]
    InvalidBasePrice(f64),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Other: {0}")]
    Other(String),
}
