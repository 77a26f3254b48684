use riff_kubehub::StoreError;
use thiserror::Error;

/// Why a reconciliation pass did not converge. Every variant requeues the key.
#[derive(Debug, Error)]
pub enum Error {
    /// A collaborator call failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The resource or a settings map needs a user fix.
    #[error("{0}")]
    Invalid(String),
    /// A referent exists but is not yet usable.
    #[error("{0}")]
    NotReady(String),
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self { Self::Invalid(msg.into()) }
    pub fn not_ready(msg: impl Into<String>) -> Self { Self::NotReady(msg.into()) }

    pub fn is_conflict(&self) -> bool { matches!(self, Self::Store(e) if e.is_conflict()) }
}
