use thiserror::Error;

pub type GrowthResult<T> = Result<T, GrowthError>;

#[derive(Error, Debug)]
pub enum GrowthError {
    #[error("Funnel not found: {0}")]
    UnknownFunnel(String),

    #[error("Funnel {0} has no steps")]
    EmptyFunnel(String),

    #[error("Funnel {funnel_id} has {steps} steps, limit is {limit}")]
    TooManySteps {
        funnel_id: String,
        steps: usize,
        limit: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for GrowthError {
    fn from(err: config::ConfigError) -> Self {
        GrowthError::Config(err.to_string())
    }
}
