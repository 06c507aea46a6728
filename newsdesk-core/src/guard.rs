//! Ownership guard.
//!
//! Every session and tracked query belongs to exactly one `user_id`. Stores
//! call into this module with the owner they read (under lock) before
//! disclosing or mutating anything. A missing record is `NotFound`; a record
//! owned by someone else is `Forbidden`.

use std::fmt::Display;

use crate::error::{NewsdeskError, RecordKind};
use crate::models::Session;

/// Records that carry an owning user id.
pub trait Owned {
    fn owner(&self) -> &str;
}

impl Owned for Session {
    fn owner(&self) -> &str {
        &self.user_id
    }
}

/// Check `caller` against the stored owner of record `id`.
pub fn authorize(
    caller: &str,
    owner: Option<&str>,
    kind: RecordKind,
    id: impl Display,
) -> Result<(), NewsdeskError> {
    match owner {
        None => Err(NewsdeskError::not_found(kind, id)),
        Some(owner) if owner != caller => {
            tracing::warn!(record = %kind, id = %id, "Ownership check failed");
            Err(NewsdeskError::forbidden(kind, id))
        }
        Some(_) => Ok(()),
    }
}

/// Rejects blank user ids before any store is touched.
pub fn require_user(user_id: &str) -> Result<(), NewsdeskError> {
    if user_id.trim().is_empty() {
        return Err(NewsdeskError::invalid("user_id is required"));
    }
    Ok(())
}
