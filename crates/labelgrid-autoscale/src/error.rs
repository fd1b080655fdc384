use thiserror::Error;

pub type FleetResult<T> = Result<T, FleetError>;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("fleet listing failed: {0}")]
    List(String),

    #[error("launch failed: {0}")]
    Launch(String),

    #[error("terminate failed: {0}")]
    Terminate(String),
}
