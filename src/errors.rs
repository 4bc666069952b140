use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Model was considered invalid due to error: {0:#}")]
    InvalidModel(anyhow::Error),
    #[error("Error identified during envelope calculation: {0:#}")]
    FailureInCalculation(anyhow::Error),
}
