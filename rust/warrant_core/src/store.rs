//! Entity store: records, bindings and cascading deletes.
//!
//! Uniqueness rests on the backend's conditional writes, never on a
//! read-then-write: entities are created with `insert_if_absent`, bindings
//! and their reverse index with `commit_if_absent`, and removed with
//! `commit_if_present`. Every mutation invalidates the cache entries of the
//! entities it touched before returning.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use warrant_storage::{Batch, KvTree};

use crate::directory::Directory;
use crate::error::{AuthzError, Result};
use crate::keys::{self, fold, normalize_email, normalize_name};
use crate::types::{
    AttrValue, EntityArg, EntityKind, EntityRef, Group, Identity, MembershipBinding, Permission,
    PermissionBinding, Subject, SubjectRef,
};

/// Rewrite the record at `key` in place. `Ok(None)` if there is no record.
pub(crate) fn modify_record<T, R, F>(tree: &T, key: &str, edit: F) -> Result<Option<R>>
where
    T: KvTree,
    R: Serialize + DeserializeOwned,
    F: FnMut(&mut R),
{
    modify_record_at(tree, key.as_bytes(), edit)
}

pub(crate) fn modify_record_at<T, R, F>(tree: &T, key: &[u8], mut edit: F) -> Result<Option<R>>
where
    T: KvTree,
    R: Serialize + DeserializeOwned,
    F: FnMut(&mut R),
{
    let mut failure = None;
    let mut updated = None;
    tree.fetch_and_update(key, &mut |current| {
        let bytes = current?;
        let encoded = bincode::deserialize::<R>(bytes).and_then(|mut record| {
            edit(&mut record);
            let encoded = bincode::serialize(&record)?;
            updated = Some(record);
            Ok(encoded)
        });
        match encoded {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                // Leave the stored bytes untouched.
                failure = Some(e);
                Some(bytes.to_vec())
            }
        }
    })?;
    if let Some(e) = failure {
        return Err(e.into());
    }
    Ok(updated)
}

fn decode_all<R: DeserializeOwned>(entries: Vec<(Vec<u8>, Vec<u8>)>) -> Result<Vec<R>> {
    entries
        .into_iter()
        .map(|(_, value)| bincode::deserialize(&value).map_err(AuthzError::from))
        .collect()
}

fn expect_kind(arg: &EntityArg, kind: EntityKind) -> Result<String> {
    if arg.kind() != kind {
        return Err(AuthzError::InvalidArgumentType {
            expected: kind.as_str(),
            found: arg.kind(),
        });
    }
    Ok(fold(arg.key()))
}

impl<T: KvTree> Directory<T> {
    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Create an active identity with no attributes.
    pub fn create_identity(&self, email: &str) -> Result<Identity> {
        self.create_identity_with(email, true, BTreeMap::new())
    }

    /// Create an identity keyed by its normalized email.
    ///
    /// Fails with `DuplicateKey` if the normalized email is taken, and with
    /// `InvalidAddress` if validation is enabled and the email is malformed.
    pub fn create_identity_with(
        &self,
        email: &str,
        active: bool,
        attributes: BTreeMap<String, AttrValue>,
    ) -> Result<Identity> {
        let key = normalize_email(email, self.validate_email)?;
        let identity = Identity {
            key,
            email: email.trim().to_string(),
            active,
            attributes,
        };
        self.insert_new(&self.identities, EntityKind::Identity, &identity.key, &identity)?;
        tracing::info!(identity = %identity.key, active, "identity created");
        Ok(identity)
    }

    pub fn create_group(&self, name: &str, description: Option<&str>) -> Result<Group> {
        let group = Group {
            key: normalize_name(name)?,
            name: name.trim().to_string(),
            description: description.map(str::to_string),
        };
        self.insert_new(&self.groups, EntityKind::Group, &group.key, &group)?;
        tracing::info!(group = %group.key, "group created");
        Ok(group)
    }

    pub fn create_permission(&self, name: &str, description: Option<&str>) -> Result<Permission> {
        let permission = Permission {
            key: normalize_name(name)?,
            name: name.trim().to_string(),
            description: description.map(str::to_string),
        };
        self.insert_new(
            &self.permissions,
            EntityKind::Permission,
            &permission.key,
            &permission,
        )?;
        tracing::info!(permission = %permission.key, "permission created");
        Ok(permission)
    }

    fn insert_new<R: Serialize>(
        &self,
        tree: &T,
        kind: EntityKind,
        key: &str,
        record: &R,
    ) -> Result<()> {
        let bytes = bincode::serialize(record)?;
        if !tree.insert_if_absent(key.as_bytes(), &bytes)? {
            return Err(AuthzError::DuplicateKey {
                kind,
                key: key.to_string(),
            });
        }
        // Entries computed against an earlier entity with this key.
        self.cache.invalidate(&[EntityRef::new(kind, key)]);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Look up an identity by email (case-insensitive).
    ///
    /// An inactive identity is only returned with `include_inactive`.
    pub fn get_identity(&self, email: &str, include_inactive: bool) -> Result<Option<Identity>> {
        let Some(identity) = self.load_identity(&fold(email))? else {
            return Ok(None);
        };
        Ok((include_inactive || identity.active).then_some(identity))
    }

    pub fn identity_exists(&self, email: &str, include_inactive: bool) -> Result<bool> {
        Ok(self.get_identity(email, include_inactive)?.is_some())
    }

    pub fn get_group(&self, name: &str) -> Result<Option<Group>> {
        self.load_group(&fold(name))
    }

    pub fn get_permission(&self, name: &str) -> Result<Option<Permission>> {
        self.load_permission(&fold(name))
    }

    pub(crate) fn load_identity(&self, key: &str) -> Result<Option<Identity>> {
        Ok(self.identities.get_bincode(key.as_bytes())?)
    }

    pub(crate) fn load_group(&self, key: &str) -> Result<Option<Group>> {
        Ok(self.groups.get_bincode(key.as_bytes())?)
    }

    pub(crate) fn load_permission(&self, key: &str) -> Result<Option<Permission>> {
        Ok(self.permissions.get_bincode(key.as_bytes())?)
    }

    pub(crate) fn load_subject(&self, subject: &SubjectRef) -> Result<Option<Subject>> {
        Ok(match subject {
            SubjectRef::Identity(key) => self.load_identity(key)?.map(Subject::Identity),
            SubjectRef::Group(key) => self.load_group(key)?.map(Subject::Group),
        })
    }

    // ------------------------------------------------------------------
    // Argument resolution
    //
    // Every argument is re-read from the store, so a stale in-memory
    // entity never stands in for the current record.
    // ------------------------------------------------------------------

    pub(crate) fn resolve_identity(&self, arg: EntityArg) -> Result<Identity> {
        let key = expect_kind(&arg, EntityKind::Identity)?;
        self.load_identity(&key)?
            .ok_or_else(|| AuthzError::RecordDoesNotExist(EntityRef::identity(key)))
    }

    pub(crate) fn resolve_group(&self, arg: EntityArg) -> Result<Group> {
        let key = expect_kind(&arg, EntityKind::Group)?;
        self.load_group(&key)?
            .ok_or_else(|| AuthzError::RecordDoesNotExist(EntityRef::group(key)))
    }

    pub(crate) fn resolve_permission(&self, arg: EntityArg) -> Result<Permission> {
        let key = expect_kind(&arg, EntityKind::Permission)?;
        self.load_permission(&key)?
            .ok_or_else(|| AuthzError::RecordDoesNotExist(EntityRef::permission(key)))
    }

    pub(crate) fn resolve_subject(&self, arg: EntityArg) -> Result<Subject> {
        match arg.kind() {
            EntityKind::Identity => Ok(Subject::Identity(self.resolve_identity(arg)?)),
            EntityKind::Group => Ok(Subject::Group(self.resolve_group(arg)?)),
            EntityKind::Permission => Err(AuthzError::InvalidArgumentType {
                expected: "identity or group",
                found: EntityKind::Permission,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Attribute setters
    // ------------------------------------------------------------------

    pub fn set_identity_attribute(
        &self,
        identity: impl Into<EntityArg>,
        name: &str,
        value: impl Into<AttrValue>,
    ) -> Result<Identity> {
        let identity = self.resolve_identity(identity.into())?;
        let value = value.into();
        let updated = modify_record(&self.identities, &identity.key, |record: &mut Identity| {
            record.attributes.insert(name.to_string(), value.clone());
        })?
        .ok_or_else(|| AuthzError::RecordDoesNotExist(identity.entity_ref()))?;
        self.cache.invalidate(&[updated.entity_ref()]);
        Ok(updated)
    }

    /// Remove an attribute, returning its previous value.
    pub fn remove_identity_attribute(
        &self,
        identity: impl Into<EntityArg>,
        name: &str,
    ) -> Result<Option<AttrValue>> {
        let identity = self.resolve_identity(identity.into())?;
        let mut removed = None;
        modify_record(&self.identities, &identity.key, |record: &mut Identity| {
            removed = record.attributes.remove(name);
        })?
        .ok_or_else(|| AuthzError::RecordDoesNotExist(identity.entity_ref()))?;
        if removed.is_some() {
            self.cache.invalidate(&[identity.entity_ref()]);
        }
        Ok(removed)
    }

    pub fn set_group_description(
        &self,
        group: impl Into<EntityArg>,
        description: Option<&str>,
    ) -> Result<Group> {
        let group = self.resolve_group(group.into())?;
        let updated = modify_record(&self.groups, &group.key, |record: &mut Group| {
            record.description = description.map(str::to_string);
        })?
        .ok_or_else(|| AuthzError::RecordDoesNotExist(group.entity_ref()))?;
        self.cache.invalidate(&[updated.entity_ref()]);
        Ok(updated)
    }

    pub fn set_permission_description(
        &self,
        permission: impl Into<EntityArg>,
        description: Option<&str>,
    ) -> Result<Permission> {
        let permission = self.resolve_permission(permission.into())?;
        let updated = modify_record(&self.permissions, &permission.key, |record: &mut Permission| {
            record.description = description.map(str::to_string);
        })?
        .ok_or_else(|| AuthzError::RecordDoesNotExist(permission.entity_ref()))?;
        self.cache.invalidate(&[updated.entity_ref()]);
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Bindings
    // ------------------------------------------------------------------

    /// Add an identity to a group. The binding's active flag starts equal to
    /// the identity's.
    pub fn bind_membership(
        &self,
        identity: impl Into<EntityArg>,
        group: impl Into<EntityArg>,
    ) -> Result<MembershipBinding> {
        let identity = self.resolve_identity(identity.into())?;
        let group = self.resolve_group(group.into())?;
        let binding = MembershipBinding {
            identity: identity.key.clone(),
            group: group.key.clone(),
            active: identity.active,
        };

        let primary = keys::member_key(&binding.identity, &binding.group);
        let mut batch = Batch::new();
        batch.insert(&primary, &bincode::serialize(&binding)?);
        batch.insert(&keys::member_of_key(&binding.group, &binding.identity), &[]);
        if !self.bindings.commit_if_absent(&primary, &batch)? {
            return Err(AuthzError::BindingExists(format!(
                "{} in {}",
                identity.entity_ref(),
                group.entity_ref()
            )));
        }

        // A concurrent delete may have swept past this pair already.
        if self.load_identity(&identity.key)?.is_none() || self.load_group(&group.key)?.is_none() {
            let reverse = keys::member_of_key(&binding.group, &binding.identity);
            return Err(self.release_orphan(
                &primary,
                &reverse,
                [identity.entity_ref(), group.entity_ref()],
            )?);
        }

        self.cache
            .invalidate(&[identity.entity_ref(), group.entity_ref()]);
        tracing::info!(identity = %binding.identity, group = %binding.group, "membership bound");
        Ok(binding)
    }

    /// Take back a binding whose endpoint was deleted while it was being
    /// written, and report the missing endpoint.
    fn release_orphan(
        &self,
        primary: &[u8],
        reverse: &[u8],
        ends: [EntityRef; 2],
    ) -> Result<AuthzError> {
        let mut batch = Batch::new();
        batch.remove(primary);
        batch.remove(reverse);
        self.bindings.commit_if_present(primary, &batch)?;
        self.cache.invalidate(&ends);

        let mut missing = ends[0].clone();
        for end in &ends {
            if !self.entity_exists(end)? {
                missing = end.clone();
                break;
            }
        }
        tracing::warn!(entity = %missing, "binding released, endpoint deleted concurrently");
        Ok(AuthzError::RecordDoesNotExist(missing))
    }

    fn entity_exists(&self, entity: &EntityRef) -> Result<bool> {
        let tree = match entity.kind {
            EntityKind::Identity => &self.identities,
            EntityKind::Group => &self.groups,
            EntityKind::Permission => &self.permissions,
        };
        Ok(tree.contains(entity.key.as_bytes())?)
    }

    /// Remove an identity from a group. `false` if they were not bound.
    pub fn unbind_membership(
        &self,
        identity: impl Into<EntityArg>,
        group: impl Into<EntityArg>,
    ) -> Result<bool> {
        let identity = self.resolve_identity(identity.into())?;
        let group = self.resolve_group(group.into())?;

        let primary = keys::member_key(&identity.key, &group.key);
        let mut batch = Batch::new();
        batch.remove(&primary);
        batch.remove(&keys::member_of_key(&group.key, &identity.key));
        let removed = self.bindings.commit_if_present(&primary, &batch)?;

        if removed {
            self.cache
                .invalidate(&[identity.entity_ref(), group.entity_ref()]);
            tracing::info!(identity = %identity.key, group = %group.key, "membership unbound");
        }
        Ok(removed)
    }

    /// Grant a permission to an identity or group.
    pub fn bind_permission(
        &self,
        permission: impl Into<EntityArg>,
        subject: impl Into<EntityArg>,
    ) -> Result<PermissionBinding> {
        let permission = self.resolve_permission(permission.into())?;
        let subject = self.resolve_subject(subject.into())?;
        let binding = PermissionBinding {
            permission: permission.key.clone(),
            subject: subject.subject_ref(),
        };

        let primary = keys::grant_key(&binding.permission, &binding.subject);
        let mut batch = Batch::new();
        batch.insert(&primary, &bincode::serialize(&binding)?);
        batch.insert(&keys::granted_key(&binding.subject, &binding.permission), &[]);
        if !self.bindings.commit_if_absent(&primary, &batch)? {
            return Err(AuthzError::BindingExists(format!(
                "{} granted to {}",
                permission.entity_ref(),
                binding.subject
            )));
        }

        if self.load_permission(&permission.key)?.is_none()
            || self.load_subject(&binding.subject)?.is_none()
        {
            let reverse = keys::granted_key(&binding.subject, &binding.permission);
            return Err(self.release_orphan(
                &primary,
                &reverse,
                [permission.entity_ref(), subject.entity_ref()],
            )?);
        }

        self.cache
            .invalidate(&[permission.entity_ref(), subject.entity_ref()]);
        tracing::info!(permission = %binding.permission, subject = %binding.subject, "permission bound");
        Ok(binding)
    }

    /// Revoke a grant. `false` if it did not exist.
    pub fn unbind_permission(
        &self,
        permission: impl Into<EntityArg>,
        subject: impl Into<EntityArg>,
    ) -> Result<bool> {
        let permission = self.resolve_permission(permission.into())?;
        let subject = self.resolve_subject(subject.into())?;
        let subject_ref = subject.subject_ref();

        let primary = keys::grant_key(&permission.key, &subject_ref);
        let mut batch = Batch::new();
        batch.remove(&primary);
        batch.remove(&keys::granted_key(&subject_ref, &permission.key));
        let removed = self.bindings.commit_if_present(&primary, &batch)?;

        if removed {
            self.cache
                .invalidate(&[permission.entity_ref(), subject.entity_ref()]);
            tracing::info!(permission = %permission.key, subject = %subject_ref, "permission unbound");
        }
        Ok(removed)
    }

    /// The membership binding of the pair, active or not.
    pub(crate) fn membership(&self, identity: &str, group: &str) -> Result<Option<MembershipBinding>> {
        Ok(self
            .bindings
            .get_bincode(&keys::member_key(identity, group))?)
    }

    /// Every membership binding owned by an identity, in group-key order.
    pub(crate) fn memberships_of_identity(&self, identity: &str) -> Result<Vec<MembershipBinding>> {
        decode_all(self.bindings.scan_prefix(&keys::member_prefix(identity))?)
    }

    /// Every membership binding into a group, in identity-key order.
    pub(crate) fn memberships_of_group(&self, group: &str) -> Result<Vec<MembershipBinding>> {
        let prefix = keys::member_of_prefix(group);
        let mut bindings = Vec::new();
        for (key, _) in self.bindings.scan_prefix(&prefix)? {
            let Some(identity) = keys::suffix_after(&key, &prefix) else {
                continue;
            };
            if let Some(binding) = self.membership(&identity, group)? {
                bindings.push(binding);
            }
        }
        Ok(bindings)
    }

    pub(crate) fn has_grant(&self, permission: &str, subject: &SubjectRef) -> Result<bool> {
        Ok(self
            .bindings
            .contains(&keys::grant_key(permission, subject))?)
    }

    /// Every grant of a permission.
    pub(crate) fn grants_of(&self, permission: &str) -> Result<Vec<PermissionBinding>> {
        decode_all(self.bindings.scan_prefix(&keys::grant_prefix(permission))?)
    }

    /// Keys of every permission granted directly to a subject.
    pub(crate) fn grants_to(&self, subject: &SubjectRef) -> Result<Vec<String>> {
        let prefix = keys::granted_prefix(subject);
        Ok(self
            .bindings
            .scan_prefix(&prefix)?
            .into_iter()
            .filter_map(|(key, _)| keys::suffix_after(&key, &prefix))
            .collect())
    }

    /// Membership bindings of an identity (public view for auditing).
    pub fn identity_memberships(&self, identity: impl Into<EntityArg>) -> Result<Vec<MembershipBinding>> {
        let identity = self.resolve_identity(identity.into())?;
        self.memberships_of_identity(&identity.key)
    }

    /// Grants of a permission (public view for auditing).
    pub fn permission_grants(&self, permission: impl Into<EntityArg>) -> Result<Vec<PermissionBinding>> {
        let permission = self.resolve_permission(permission.into())?;
        self.grants_of(&permission.key)
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Delete any entity, cascading to its bindings.
    pub fn delete(&self, entity: impl Into<EntityArg>) -> Result<()> {
        let entity = entity.into();
        match entity.kind() {
            EntityKind::Identity => self.delete_identity(entity),
            EntityKind::Group => self.delete_group(entity),
            EntityKind::Permission => self.delete_permission(entity),
        }
    }

    /// Delete an identity with its memberships and direct grants.
    pub fn delete_identity(&self, identity: impl Into<EntityArg>) -> Result<()> {
        let identity = self.resolve_identity(identity.into())?;
        let subject = SubjectRef::Identity(identity.key.clone());
        self.finish_delete(&self.identities, identity.entity_ref(), |batch, touched| {
            for binding in self.memberships_of_identity(&identity.key)? {
                batch.remove(&keys::member_key(&binding.identity, &binding.group));
                batch.remove(&keys::member_of_key(&binding.group, &binding.identity));
                touched.push(EntityRef::group(binding.group));
            }
            self.unbind_grants_to(&subject, batch, touched)
        })
    }

    /// Delete a group with its memberships and direct grants.
    pub fn delete_group(&self, group: impl Into<EntityArg>) -> Result<()> {
        let group = self.resolve_group(group.into())?;
        let subject = SubjectRef::Group(group.key.clone());
        self.finish_delete(&self.groups, group.entity_ref(), |batch, touched| {
            let prefix = keys::member_of_prefix(&group.key);
            for (key, _) in self.bindings.scan_prefix(&prefix)? {
                let Some(identity) = keys::suffix_after(&key, &prefix) else {
                    continue;
                };
                batch.remove(&keys::member_key(&identity, &group.key));
                batch.remove(&key);
                touched.push(EntityRef::identity(identity));
            }
            self.unbind_grants_to(&subject, batch, touched)
        })
    }

    /// Delete a permission with every grant of it.
    pub fn delete_permission(&self, permission: impl Into<EntityArg>) -> Result<()> {
        let permission = self.resolve_permission(permission.into())?;
        self.finish_delete(&self.permissions, permission.entity_ref(), |batch, touched| {
            for binding in self.grants_of(&permission.key)? {
                batch.remove(&keys::grant_key(&binding.permission, &binding.subject));
                batch.remove(&keys::granted_key(&binding.subject, &binding.permission));
                touched.push(binding.subject.entity_ref());
            }
            Ok(())
        })
    }

    fn unbind_grants_to(
        &self,
        subject: &SubjectRef,
        batch: &mut Batch,
        touched: &mut Vec<EntityRef>,
    ) -> Result<()> {
        for permission in self.grants_to(subject)? {
            batch.remove(&keys::grant_key(&permission, subject));
            batch.remove(&keys::granted_key(subject, &permission));
            touched.push(EntityRef::permission(permission));
        }
        Ok(())
    }

    /// Drop the bindings `collect` finds, then the record, then whatever a
    /// concurrent bind committed in between. Counterparts are invalidated
    /// before the entity itself.
    ///
    /// A bind that commits after the second scan finds the record gone and
    /// releases its own binding.
    fn finish_delete<F>(&self, tree: &T, entity: EntityRef, collect: F) -> Result<()>
    where
        F: Fn(&mut Batch, &mut Vec<EntityRef>) -> Result<()>,
    {
        let mut touched = Vec::new();
        let mut bindings = Batch::new();
        collect(&mut bindings, &mut touched)?;
        let mut cascaded = bindings.len() / 2;
        if !bindings.is_empty() {
            self.bindings.apply_batch(&bindings)?;
        }
        tree.delete(entity.key.as_bytes())?;

        let mut stragglers = Batch::new();
        collect(&mut stragglers, &mut touched)?;
        if !stragglers.is_empty() {
            self.bindings.apply_batch(&stragglers)?;
            cascaded += stragglers.len() / 2;
            tracing::debug!(%entity, count = stragglers.len() / 2, "removed bindings written during delete");
        }

        touched.push(entity.clone());
        self.cache.invalidate(&touched);
        tracing::info!(%entity, bindings = cascaded, "entity deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Listing
    // ------------------------------------------------------------------

    /// All identities in key order.
    pub fn list_identities(&self, include_inactive: bool) -> Result<Vec<Identity>> {
        let identities: Vec<Identity> = decode_all(self.identities.scan_prefix(b"")?)?;
        Ok(identities
            .into_iter()
            .filter(|identity| include_inactive || identity.active)
            .collect())
    }

    /// Identities whose attribute `name` equals `value`.
    pub fn find_identities_by_attribute(
        &self,
        name: &str,
        value: &AttrValue,
        include_inactive: bool,
    ) -> Result<Vec<Identity>> {
        Ok(self
            .list_identities(include_inactive)?
            .into_iter()
            .filter(|identity| identity.attribute(name) == Some(value))
            .collect())
    }

    pub fn list_groups(&self) -> Result<Vec<Group>> {
        decode_all(self.groups.scan_prefix(b"")?)
    }

    pub fn list_permissions(&self) -> Result<Vec<Permission>> {
        decode_all(self.permissions.scan_prefix(b"")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warrant_storage::MemoryTree;

    fn directory() -> Directory<MemoryTree> {
        Directory::in_memory().unwrap()
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let dir = directory();
        let alice = dir.create_identity("  Alice@Example.COM ").unwrap();
        assert_eq!(alice.key(), "alice@example.com");
        assert_eq!(alice.email(), "Alice@Example.COM");

        let err = dir.create_identity("alice@example.com").unwrap_err();
        assert!(matches!(
            err,
            AuthzError::DuplicateKey { kind: EntityKind::Identity, .. }
        ));
        assert!(dir.get_identity("ALICE@example.com", false).unwrap().is_some());
    }

    #[test]
    fn test_duplicate_group_and_permission_names() {
        let dir = directory();
        dir.create_group("Admins", Some("administrators")).unwrap();
        assert!(dir.create_group("admins", None).unwrap_err().is_duplicate());
        dir.create_permission("Deploy", None).unwrap();
        assert!(dir.create_permission(" DEPLOY", None).unwrap_err().is_duplicate());
        assert_eq!(dir.list_groups().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_inputs() {
        let dir = directory();
        assert!(matches!(
            dir.create_identity("nobody"),
            Err(AuthzError::InvalidAddress(_))
        ));
        assert!(matches!(dir.create_group("  ", None), Err(AuthzError::InvalidName(_))));
        assert!(matches!(
            dir.create_permission("tab\there", None),
            Err(AuthzError::InvalidName(_))
        ));
    }

    #[test]
    fn test_get_identity_hides_inactive_by_default() {
        let dir = directory();
        dir.create_identity_with("bob@x.com", false, BTreeMap::new())
            .unwrap();
        assert!(dir.get_identity("bob@x.com", false).unwrap().is_none());
        assert!(dir.get_identity("bob@x.com", true).unwrap().is_some());
        assert!(!dir.identity_exists("bob@x.com", false).unwrap());
        assert!(dir.identity_exists("bob@x.com", true).unwrap());
        assert!(!dir.identity_exists("carol@x.com", true).unwrap());
    }

    #[test]
    fn test_bind_twice_is_binding_exists() {
        let dir = directory();
        let alice = dir.create_identity("a@x.com").unwrap();
        let admins = dir.create_group("admins", None).unwrap();
        let binding = dir.bind_membership(&alice, &admins).unwrap();
        assert!(binding.active);
        assert!(matches!(
            dir.bind_membership(&alice, &admins),
            Err(AuthzError::BindingExists(_))
        ));

        let deploy = dir.create_permission("deploy", None).unwrap();
        dir.bind_permission(&deploy, &admins).unwrap();
        assert!(matches!(
            dir.bind_permission(&deploy, EntityRef::group("ADMINS")),
            Err(AuthzError::BindingExists(_))
        ));
    }

    #[test]
    fn test_unbind_reports_absence() {
        let dir = directory();
        let alice = dir.create_identity("a@x.com").unwrap();
        let admins = dir.create_group("admins", None).unwrap();
        assert!(!dir.unbind_membership(&alice, &admins).unwrap());
        dir.bind_membership(&alice, &admins).unwrap();
        assert!(dir.unbind_membership(&alice, &admins).unwrap());
        assert!(!dir.unbind_membership(&alice, &admins).unwrap());
        assert!(dir.bindings.is_empty().unwrap());
    }

    #[test]
    fn test_wrong_argument_kind() {
        let dir = directory();
        let admins = dir.create_group("admins", None).unwrap();
        let deploy = dir.create_permission("deploy", None).unwrap();
        assert!(matches!(
            dir.bind_membership(&admins, &admins),
            Err(AuthzError::InvalidArgumentType { expected: "identity", found: EntityKind::Group })
        ));
        assert!(matches!(
            dir.bind_permission(&deploy, &deploy),
            Err(AuthzError::InvalidArgumentType { found: EntityKind::Permission, .. })
        ));
        assert!(matches!(
            dir.bind_membership(EntityRef::identity("ghost@x.com"), &admins),
            Err(AuthzError::RecordDoesNotExist(_))
        ));
    }

    #[test]
    fn test_delete_group_cascades_both_directions() {
        let dir = directory();
        let alice = dir.create_identity("a@x.com").unwrap();
        let bob = dir.create_identity("b@x.com").unwrap();
        let admins = dir.create_group("admins", None).unwrap();
        let deploy = dir.create_permission("deploy", None).unwrap();
        dir.bind_membership(&alice, &admins).unwrap();
        dir.bind_membership(&bob, &admins).unwrap();
        dir.bind_permission(&deploy, &admins).unwrap();
        dir.bind_permission(&deploy, &bob).unwrap();

        dir.delete(&admins).unwrap();

        assert!(dir.get_group("admins").unwrap().is_none());
        assert!(dir.identity_memberships(&alice).unwrap().is_empty());
        let grants = dir.permission_grants(&deploy).unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].subject, SubjectRef::Identity("b@x.com".into()));
        // Primary and reverse entry of bob's grant remain.
        assert_eq!(dir.bindings.len().unwrap(), 2);
        assert!(matches!(
            dir.delete_group(&admins),
            Err(AuthzError::RecordDoesNotExist(_))
        ));
    }

    #[test]
    fn test_binding_to_a_vanished_endpoint_is_released() {
        let dir = directory();
        let alice = dir.create_identity("a@x.com").unwrap();
        let ops = dir.create_group("ops", None).unwrap();
        dir.bind_membership(&alice, &ops).unwrap();
        assert!(dir.member_of(&alice, &ops).unwrap());

        // The record goes first, as a delete racing the bind leaves it.
        dir.identities.delete(b"a@x.com").unwrap();
        let primary = keys::member_key("a@x.com", "ops");
        let reverse = keys::member_of_key("ops", "a@x.com");
        let err = dir
            .release_orphan(&primary, &reverse, [alice.entity_ref(), ops.entity_ref()])
            .unwrap();
        assert!(matches!(err, AuthzError::RecordDoesNotExist(ref e) if *e == alice.entity_ref()));
        assert!(!dir.bindings.contains(&primary).unwrap());
        assert!(!dir.bindings.contains(&reverse).unwrap());

        let again = dir.create_identity("a@x.com").unwrap();
        assert!(dir.identity_memberships(&again).unwrap().is_empty());
        assert!(!dir.member_of(&again, &ops).unwrap());
        assert!(dir.members_of(&ops, true).unwrap().is_empty());
    }

    #[test]
    fn test_attribute_setters() {
        let dir = directory();
        let alice = dir.create_identity("a@x.com").unwrap();
        let alice = dir.set_identity_attribute(&alice, "team", "infra").unwrap();
        assert_eq!(alice.attribute("team"), Some(&AttrValue::from("infra")));
        dir.set_identity_attribute(&alice, "level", 3).unwrap();

        let found = dir
            .find_identities_by_attribute("team", &AttrValue::from("infra"), false)
            .unwrap();
        assert_eq!(found, vec![alice.clone()]);

        assert_eq!(
            dir.remove_identity_attribute(&alice, "team").unwrap(),
            Some(AttrValue::from("infra"))
        );
        assert_eq!(dir.remove_identity_attribute(&alice, "team").unwrap(), None);
        let reloaded = dir.get_identity("a@x.com", false).unwrap().unwrap();
        assert_eq!(reloaded.attribute("level"), Some(&AttrValue::Int(3)));

        let admins = dir.create_group("admins", None).unwrap();
        let admins = dir.set_group_description(&admins, Some("root")).unwrap();
        assert_eq!(admins.description(), Some("root"));
        let deploy = dir.create_permission("deploy", Some("ship it")).unwrap();
        let deploy = dir.set_permission_description(&deploy, None).unwrap();
        assert_eq!(deploy.description(), None);
    }

    #[test]
    fn test_listing_is_key_ordered() {
        let dir = directory();
        dir.create_identity("c@x.com").unwrap();
        dir.create_identity("a@x.com").unwrap();
        dir.create_identity_with("b@x.com", false, BTreeMap::new())
            .unwrap();
        let active: Vec<_> = dir
            .list_identities(false)
            .unwrap()
            .iter()
            .map(|i| i.key().to_string())
            .collect();
        assert_eq!(active, vec!["a@x.com", "c@x.com"]);
        assert_eq!(dir.list_identities(true).unwrap().len(), 3);
    }
}
