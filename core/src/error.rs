use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Reads are refused outside the `Ready` state.
    #[error("repository is not ready")]
    NotReady,
    #[error("unknown namespace {0}")]
    InvalidNamespace(String),
    #[error(transparent)]
    Engine(#[from] StoreError),
    /// The engine accepted the update but the config file could not be written.
    #[error("failed to persist ranking config to {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Engine(StoreError::NotFound))
    }
}
