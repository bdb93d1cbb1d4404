use thiserror::Error;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("no flavours enabled")]
    NoFlavoursEnabled,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no strategies available for scheduling")]
    NoStrategies,

    #[error(transparent)]
    Policy(#[from] PolicyError),
}
