#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PersistError {
    #[error(transparent)]
    Substrate(#[from] collab_primitives::substrate::SubstrateError),
    #[error("stored snapshot failed checksum verification")]
    ChecksumMismatch,
    #[error("stored snapshot had malformed base64: {0}")]
    InvalidEncoding(String),
}
