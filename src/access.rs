//! Per-tenant access filtering.
//!
//! Every read path runs through this filter before any cache or builder
//! interaction, and the same check guards cache hits and live computations —
//! caching can never widen access beyond what a live query would grant.
//!
//! Membership is supplied by the identity collaborator (loaded once per
//! request from `workspace_members`); this module only intersects requests
//! against it.

use std::collections::HashSet;

use uuid::Uuid;

use crate::errors::AppError;

/// An authenticated caller together with the workspaces they may read.
/// The workspace set is authoritative input from the identity provider;
/// whether it includes the "see own rows" carve-out is decided at load time
/// by `PgStore::authorized_workspaces`, never in here.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: Uuid,
    pub workspaces: HashSet<Uuid>,
}

impl Caller {
    pub fn new(user_id: Uuid, workspaces: HashSet<Uuid>) -> Self {
        Self {
            user_id,
            workspaces,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AccessFilter;

impl AccessFilter {
    /// Authorize a single-workspace read. The denial is deliberately
    /// indistinguishable from "workspace does not exist".
    pub fn authorize(&self, caller: &Caller, workspace_id: Uuid) -> Result<(), AppError> {
        if caller.workspaces.contains(&workspace_id) {
            Ok(())
        } else {
            Err(AppError::Unauthorized)
        }
    }

    /// The full set of workspaces a scan may touch. Empty means the caller
    /// gets an empty result without any cache or compute cost.
    pub fn authorize_scan<'c>(&self, caller: &'c Caller) -> &'c HashSet<Uuid> {
        &caller.workspaces
    }

    /// Fast-fail check: callers with no readable workspaces never reach the
    /// cache or the aggregate builder.
    pub fn has_any_access(&self, caller: &Caller) -> bool {
        !caller.workspaces.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller_with(workspaces: &[Uuid]) -> Caller {
        Caller::new(Uuid::new_v4(), workspaces.iter().copied().collect())
    }

    #[test]
    fn member_workspace_is_authorized() {
        let ws = Uuid::new_v4();
        let caller = caller_with(&[ws]);
        assert!(AccessFilter.authorize(&caller, ws).is_ok());
    }

    #[test]
    fn cross_workspace_read_is_unauthorized() {
        let mine = Uuid::new_v4();
        let theirs = Uuid::new_v4();
        let caller = caller_with(&[mine]);

        let err = AccessFilter.authorize(&caller, theirs).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[test]
    fn empty_membership_fails_fast() {
        let caller = caller_with(&[]);
        assert!(!AccessFilter.has_any_access(&caller));
        assert!(AccessFilter.authorize_scan(&caller).is_empty());
        assert!(AccessFilter
            .authorize(&caller, Uuid::new_v4())
            .is_err());
    }
}
