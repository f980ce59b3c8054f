//! Domain error type shared by the persistence and assignment layers.

use thiserror::Error;

use crate::models::ItemStatus;

/// Result alias for operations that surface [`InventoryError`].
pub type Result<T> = std::result::Result<T, InventoryError>;

/// Everything that can go wrong while reading or mutating the inventory.
///
/// The variants line up with how the UI reacts: validation problems stay on
/// the open form, conflicts get a blocking notice, database failures abort
/// the current operation.
#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("{0}")]
    Validation(String),

    #[error("{item} is already assigned to student {holder}.")]
    Conflict { item: String, holder: String },

    #[error("{item} is marked {status} and cannot be assigned.")]
    Unavailable { item: String, status: ItemStatus },

    #[error("{item} is not currently assigned.")]
    NotAssigned { item: String },

    #[error("{0} not found.")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl InventoryError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        InventoryError::Validation(message.into())
    }

    /// True when the item exists but is held or parked and therefore cannot
    /// be handed out.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            InventoryError::Conflict { .. } | InventoryError::Unavailable { .. }
        )
    }
}
