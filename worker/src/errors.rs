use crate::config::ValidationError;

#[derive(thiserror::Error, Debug)]
pub enum WorkerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),

    #[error("hyper error: {0}")]
    Hyper(#[from] hyper::Error),
}
