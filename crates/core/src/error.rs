use thiserror::Error;

/// Failures reported by a [`DocumentProvider`](crate::provider::DocumentProvider).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("query for {uri} failed: {reason}")]
    Query { uri: String, reason: String },
    #[error("invalid document id: {0}")]
    InvalidDocumentId(String),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Cannot create document from Uri: {uri}")]
    NotPositioned { uri: String },
    #[error("row without a document id under {uri}")]
    MissingDocumentId { uri: String },
    #[error("malformed tree reference: {reference}")]
    MalformedReference { reference: String },
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("resolution cancelled")]
    Cancelled,
    #[error("resolution task failed: {0}")]
    Task(String),
}

impl ResolveError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResolveError::Cancelled)
    }
}

pub type Result<T, E = ResolveError> = std::result::Result<T, E>;
