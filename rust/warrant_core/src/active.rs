//! Active-state propagation.
//!
//! Suspending an identity keeps its memberships but marks each binding
//! inactive, so `groups_of` and `member_of` drop them without consulting
//! the identity record.

use warrant_storage::KvTree;

use crate::directory::Directory;
use crate::error::{AuthzError, Result};
use crate::keys;
use crate::store::{modify_record, modify_record_at};
use crate::types::{EntityArg, EntityRef, Identity, MembershipBinding};

impl<T: KvTree> Directory<T> {
    /// Set an identity's active flag and mirror it onto every membership.
    ///
    /// Setting the current value is a no-op: nothing is written and nothing
    /// is invalidated.
    pub fn set_active(&self, identity: impl Into<EntityArg>, active: bool) -> Result<Identity> {
        let current = self.resolve_identity(identity.into())?;
        if current.active == active {
            return Ok(current);
        }

        let mut changed = false;
        let updated = modify_record(&self.identities, &current.key, |record: &mut Identity| {
            changed = record.active != active;
            record.active = active;
        })?
        .ok_or_else(|| AuthzError::RecordDoesNotExist(current.entity_ref()))?;
        if !changed {
            // A concurrent caller already applied this flip.
            return Ok(updated);
        }

        let me = updated.entity_ref();
        let mut propagated = 0usize;
        for binding in self.memberships_of_identity(&updated.key)? {
            if binding.active == active {
                continue;
            }
            let key = keys::member_key(&binding.identity, &binding.group);
            // Only rewrite bindings that still exist.
            let rewritten =
                modify_record_at(&self.bindings, &key, |b: &mut MembershipBinding| {
                    b.active = active
                })?;
            if rewritten.is_some() {
                propagated += 1;
                self.cache
                    .invalidate(&[me.clone(), EntityRef::group(binding.group)]);
            }
        }
        self.cache.invalidate(&[me]);

        tracing::info!(identity = %updated.key, active, bindings = propagated, "identity active flag changed");
        Ok(updated)
    }

    /// Suspend an identity.
    pub fn deactivate(&self, identity: impl Into<EntityArg>) -> Result<Identity> {
        self.set_active(identity, false)
    }

    /// Reinstate an identity.
    pub fn activate(&self, identity: impl Into<EntityArg>) -> Result<Identity> {
        self.set_active(identity, true)
    }
}
