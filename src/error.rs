use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed event: missing required field `{field}`")]
    MalformedEvent { field: &'static str },

    #[error("scoring model not loaded")]
    ScoringUnavailable,
}

pub type Result<T> = std::result::Result<T, PipelineError>;
