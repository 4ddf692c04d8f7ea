use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{message}")]
    Timeout { message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Option '{value}' not found in selection control {selector}")]
    OptionNotFound { selector: String, value: String },

    #[error("Unknown shipping option(s), please refer to the documentation/README: {options:?}")]
    UnknownShippingOptions { options: Vec<String> },

    #[error("You can only specify shipping options for one package size, got {sizes:?}")]
    ShippingSizeConflict { sizes: Vec<String> },

    #[error("Special attribute field not found: {field}")]
    AttributeFieldNotFound { field: String },

    #[error("No adId query parameter in confirmation URL: {url}")]
    AdIdMissing { url: String },

    #[error("Not logged in as '{username}': log in before starting the program")]
    LoginRequired { username: String },
}

impl AppError {
    /// True for bounded-wait expirations, which several workflow steps
    /// recover from via documented fallbacks.
    pub fn is_timeout(&self) -> bool {
        matches!(self, AppError::Timeout { .. })
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<glob::PatternError> for AppError {
    fn from(err: glob::PatternError) -> Self {
        AppError::Config(format!("invalid glob pattern: {err}"))
    }
}

// headless_chrome surfaces its failures as anyhow errors
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Browser(err.to_string())
    }
}

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
