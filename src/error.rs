use thiserror::Error;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("Proxy provider error: {0}")]
    Provider(String),

    #[error("Proxy pool is empty")]
    EmptyPool,

    #[error("Session pool init failed: {0}")]
    PoolInit(String),

    #[error("Navigation timed out: {0}")]
    NavigationTimeout(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Enrichment service error: {0}")]
    Service(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ScraperError {
    /// Whether the session that produced this error is unusable and should
    /// be recycled instead of returned to the idle set.
    pub fn poisons_session(&self) -> bool {
        matches!(
            self,
            ScraperError::Browser(_)
                | ScraperError::NavigationTimeout(_)
                | ScraperError::ExtractionFailed(_)
        )
    }
}

// Conversion implementations for common error types
impl From<std::io::Error> for ScraperError {
    fn from(err: std::io::Error) -> Self {
        ScraperError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ScraperError {
    fn from(err: serde_json::Error) -> Self {
        ScraperError::Parse(err.to_string())
    }
}

impl From<toml::de::Error> for ScraperError {
    fn from(err: toml::de::Error) -> Self {
        ScraperError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for ScraperError {
    fn from(err: reqwest::Error) -> Self {
        ScraperError::Network(err.to_string())
    }
}

impl From<chromiumoxide::error::CdpError> for ScraperError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        ScraperError::Browser(err.to_string())
    }
}
