//! Authorization predicates.
//!
//! Evaluated by the engine before any registry call. Denials are opaque:
//! a caller cannot tell an ownership failure from a role failure. The engine
//! writes the FAILED audit record for denied operations; these functions
//! only decide.

use crate::error::CoreError;
use crate::types::{Actor, KeyRecord};

/// An inactive actor may do nothing.
pub fn ensure_actor_active(actor: &Actor) -> Result<(), CoreError> {
    if actor.is_active() {
        Ok(())
    } else {
        Err(CoreError::NotAuthenticated)
    }
}

/// Read access: owners see their own keys, administrators see everything.
pub fn ensure_can_read(actor: &Actor, key: &KeyRecord) -> Result<(), CoreError> {
    if actor.is_admin() || key.owner == actor.id {
        Ok(())
    } else {
        Err(CoreError::NotAuthorized)
    }
}

/// Mutation (revoke): limited to the owner or an administrator.
pub fn ensure_can_mutate(actor: &Actor, key: &KeyRecord) -> Result<(), CoreError> {
    if actor.is_admin() || key.owner == actor.id {
        Ok(())
    } else {
        Err(CoreError::NotAuthorized)
    }
}

/// Cryptographic use: ownership plus active status.
pub fn ensure_can_use(actor: &Actor, key: &KeyRecord) -> Result<(), CoreError> {
    ensure_can_read(actor, key)?;
    if !key.status.is_active() {
        return Err(CoreError::KeyNotActive(key.internal_id));
    }
    Ok(())
}

/// Administrative surfaces require the administrator role.
pub fn ensure_admin(actor: &Actor) -> Result<(), CoreError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(CoreError::NotAuthorized)
    }
}
