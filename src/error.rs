use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepricerError {
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid currency pattern: {0}")]
    PatternError(#[from] regex::Error),

    #[error("Document error: {0}")]
    DocumentError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid unit: {0}")]
    InvalidUnit(String),
}

impl RepricerError {
    /// Get an actionable hint for how to resolve this error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            RepricerError::TomlError(_) => Some(
                "Check the settings file with `repricer config`, or recreate it:\n  repricer init --force"
            ),
            RepricerError::ConfigError(_) => Some(
                "Set REPRICER_CONFIG to a writable path, or run `repricer init`"
            ),
            RepricerError::InvalidUnit(_) => Some(
                "Unit rates must be positive numbers:\n  repricer units set coffees 0.25"
            ),
            RepricerError::DocumentError(_) => Some(
                "Check that the input file is readable HTML"
            ),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RepricerError>;
