use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("record codec error: {0}")]
    Codec(String),
    #[error("{collection}/{key} not found")]
    NotFound { collection: String, key: String },
    #[error("collection {0} was never declared")]
    UndeclaredCollection(String),
}

impl StoreError {
    pub fn not_found(collection: &str, key: impl ToString) -> Self {
        StoreError::NotFound {
            collection: collection.to_string(),
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
