use monitoring::HandlerError;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum EntityError {
    #[error("invalid entity id: {0}")]
    InvalidId(String),

    #[error("could not construct entity {id}: {reason}")]
    Construction { id: String, reason: String },
}

impl From<EntityError> for HandlerError {
    fn from(e: EntityError) -> Self {
        HandlerError::Entity(e.to_string())
    }
}
