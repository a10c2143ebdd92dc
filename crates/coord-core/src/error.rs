//! Coordination-service error taxonomy (§7).
//!
//! Classifiable cases a caller needs to branch on live here via `thiserror`;
//! anything else is wrapped in `anyhow` at the component boundary.

/// Errors a `CoordinationClient` implementation can surface.
#[derive(Debug, thiserror::Error)]
pub enum CoordError {
    /// The target znode does not exist. Callers treat this as "absent in
    /// this pass" on reads, and as a no-op on deletes.
    #[error("no node at path: {path}")]
    NoNode { path: String },

    /// The coordination-service session was lost. The client must be
    /// rebuilt and all components re-initialized.
    #[error("coordination-service session lost")]
    ConnectionLoss,

    /// A znode that was expected to be absent already exists with
    /// conflicting data (and the caller did not ask for `guarantee`
    /// semantics, which would instead overwrite it).
    #[error("node already exists at path: {path}")]
    NodeExists { path: String },

    /// Any other failure from the underlying client.
    #[error("coordination-service error: {0}")]
    Other(#[from] anyhow::Error),
}

impl CoordError {
    /// `true` for `NoNode`, matching the "treat as absent / ignore" handling
    /// in §7 for refreshes and deletes.
    #[must_use]
    pub fn is_no_node(&self) -> bool {
        matches!(self, CoordError::NoNode { .. })
    }
}
