//! Resolution engine: cached queries over the authorization graph.
//!
//! Each query probes the cache under its derived key, and on a miss reads
//! the store, computes the answer and caches it with the entities it read.
//! Negative and empty answers are cached too: they always depend on the
//! queried entity (and target, for predicates), so some mutation reaches
//! them.
//!
//! Groups do not nest. An identity's effective permissions are its direct
//! grants plus the direct grants of the groups it is actively bound to.
//!
//! | query                 | depends on                                  |
//! |-----------------------|---------------------------------------------|
//! | `groups_of`           | identity, its active groups                 |
//! | `direct_permissions`  | subject, its permissions                    |
//! | `group_permissions`   | identity, its groups, their permissions     |
//! | `all_permissions`     | identity, its groups, every permission seen |
//! | `has_permission`      | subject, permission, groups consulted       |
//! | `member_of` et al.    | group, identity                             |
//! | `members_of`          | group, its members                          |
//! | `permission_holders`  | permission, every holder                    |

use std::collections::BTreeMap;

use ahash::AHashSet;
use serde::de::DeserializeOwned;
use serde::Serialize;
use warrant_storage::KvTree;

use crate::cache::{derived_key, derived_pair_key};
use crate::directory::Directory;
use crate::error::Result;
use crate::types::{EntityArg, EntityRef, Group, Identity, Permission, Subject, SubjectRef};

const ALL_GROUPS: &str = "all_groups";
const DIRECT_PERMISSIONS: &str = "direct_permissions";
const GROUP_PERMISSIONS: &str = "group_permissions";
const ALL_PERMISSIONS: &str = "all_permissions";
const HAS: &str = "has";
const HAS_MEMBER: &str = "has_member";
const HAS_MEMBER_ANY: &str = "has_member_include_inactive";
const MEMBERS: &str = "members";
const MEMBERS_ANY: &str = "members_include_inactive";
const HOLDERS: &str = "holders";

/// Deduplicated dependency list, in first-seen order.
#[derive(Default)]
struct Dependencies {
    seen: AHashSet<EntityRef>,
    refs: Vec<EntityRef>,
}

impl Dependencies {
    fn of(entities: impl IntoIterator<Item = EntityRef>) -> Self {
        let mut deps = Self::default();
        deps.extend(entities);
        deps
    }

    fn push(&mut self, entity: EntityRef) {
        if self.seen.insert(entity.clone()) {
            self.refs.push(entity);
        }
    }

    fn extend(&mut self, entities: impl IntoIterator<Item = EntityRef>) {
        for entity in entities {
            self.push(entity);
        }
    }

    fn into_vec(self) -> Vec<EntityRef> {
        self.refs
    }
}

impl<T: KvTree> Directory<T> {
    /// Serve `key` from the cache, or compute it and cache it with its
    /// dependencies.
    fn cached<V, F>(&self, key: &str, compute: F) -> Result<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<(V, Dependencies)>,
    {
        if let Some(value) = self.cache.fetch(key) {
            return Ok(value);
        }
        let (value, dependencies) = compute()?;
        self.cache.store(key, &value, &dependencies.into_vec());
        Ok(value)
    }

    // ------------------------------------------------------------------
    // Groups and permissions
    // ------------------------------------------------------------------

    /// Groups the identity is actively bound to, in key order.
    pub fn groups_of(&self, identity: impl Into<EntityArg>) -> Result<Vec<Group>> {
        let identity = self.resolve_identity(identity.into())?;
        self.groups_of_identity(&identity)
    }

    fn groups_of_identity(&self, identity: &Identity) -> Result<Vec<Group>> {
        let me = identity.entity_ref();
        self.cached(&derived_key(&me, ALL_GROUPS), || {
            let mut groups = Vec::new();
            for binding in self.memberships_of_identity(&identity.key)? {
                if !binding.active {
                    continue;
                }
                if let Some(group) = self.load_group(&binding.group)? {
                    groups.push(group);
                }
            }
            let mut deps = Dependencies::of([me.clone()]);
            deps.extend(groups.iter().map(Group::entity_ref));
            Ok((groups, deps))
        })
    }

    /// Permissions granted directly to an identity or group, in key order.
    pub fn direct_permissions(&self, subject: impl Into<EntityArg>) -> Result<Vec<Permission>> {
        let subject = self.resolve_subject(subject.into())?;
        self.direct_permissions_of(&subject.subject_ref())
    }

    fn direct_permissions_of(&self, subject: &SubjectRef) -> Result<Vec<Permission>> {
        let me = subject.entity_ref();
        self.cached(&derived_key(&me, DIRECT_PERMISSIONS), || {
            let mut permissions = Vec::new();
            for key in self.grants_to(subject)? {
                if let Some(permission) = self.load_permission(&key)? {
                    permissions.push(permission);
                }
            }
            let mut deps = Dependencies::of([me.clone()]);
            deps.extend(permissions.iter().map(Permission::entity_ref));
            Ok((permissions, deps))
        })
    }

    /// Union of the direct permissions of the identity's active groups.
    pub fn group_permissions(&self, identity: impl Into<EntityArg>) -> Result<Vec<Permission>> {
        let identity = self.resolve_identity(identity.into())?;
        self.group_permissions_of(&identity)
    }

    fn group_permissions_of(&self, identity: &Identity) -> Result<Vec<Permission>> {
        let me = identity.entity_ref();
        self.cached(&derived_key(&me, GROUP_PERMISSIONS), || {
            let groups = self.groups_of_identity(identity)?;
            let mut union = BTreeMap::new();
            for group in &groups {
                for permission in self.direct_permissions_of(&SubjectRef::Group(group.key.clone()))? {
                    union.insert(permission.key.clone(), permission);
                }
            }
            let mut deps = Dependencies::of([me.clone()]);
            deps.extend(groups.iter().map(Group::entity_ref));
            deps.extend(union.values().map(Permission::entity_ref));
            Ok((union.into_values().collect(), deps))
        })
    }

    /// Effective permissions, deduplicated by key.
    ///
    /// For a group this is its direct permissions.
    pub fn all_permissions(&self, subject: impl Into<EntityArg>) -> Result<Vec<Permission>> {
        match self.resolve_subject(subject.into())? {
            Subject::Identity(identity) => self.all_permissions_of(&identity),
            Subject::Group(group) => self.direct_permissions_of(&SubjectRef::Group(group.key)),
        }
    }

    fn all_permissions_of(&self, identity: &Identity) -> Result<Vec<Permission>> {
        let me = identity.entity_ref();
        self.cached(&derived_key(&me, ALL_PERMISSIONS), || {
            let groups = self.groups_of_identity(identity)?;
            let mut union = BTreeMap::new();
            let direct = self.direct_permissions_of(&SubjectRef::Identity(identity.key.clone()))?;
            let inherited = self.group_permissions_of(identity)?;
            for permission in direct.into_iter().chain(inherited) {
                union.insert(permission.key.clone(), permission);
            }
            let mut deps = Dependencies::of([me.clone()]);
            deps.extend(groups.iter().map(Group::entity_ref));
            deps.extend(union.values().map(Permission::entity_ref));
            Ok((union.into_values().collect(), deps))
        })
    }

    /// Whether the subject holds the permission, directly or (for an
    /// identity) through an active group.
    pub fn has_permission(
        &self,
        subject: impl Into<EntityArg>,
        permission: impl Into<EntityArg>,
    ) -> Result<bool> {
        let subject = self.resolve_subject(subject.into())?;
        let permission = self.resolve_permission(permission.into())?;
        self.subject_has_permission(&subject, &permission)
    }

    /// Whether the subject holds every listed permission. An empty list is
    /// `false`.
    pub fn has_permissions<I>(&self, subject: impl Into<EntityArg>, permissions: I) -> Result<bool>
    where
        I: IntoIterator,
        I::Item: Into<EntityArg>,
    {
        let subject = self.resolve_subject(subject.into())?;
        let permissions = permissions
            .into_iter()
            .map(|permission| self.resolve_permission(permission.into()))
            .collect::<Result<Vec<_>>>()?;
        if permissions.is_empty() {
            return Ok(false);
        }
        for permission in &permissions {
            if !self.subject_has_permission(&subject, permission)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn subject_has_permission(&self, subject: &Subject, permission: &Permission) -> Result<bool> {
        let me = subject.entity_ref();
        let target = permission.entity_ref();
        self.cached(&derived_pair_key(&me, HAS, &target), || {
            let mut deps = Dependencies::of([me.clone(), target.clone()]);
            if self.has_grant(&permission.key, &subject.subject_ref())? {
                return Ok((true, deps));
            }
            if let Subject::Identity(identity) = subject {
                for group in self.groups_of_identity(identity)? {
                    deps.push(group.entity_ref());
                    if self.subject_has_permission(&Subject::Group(group), permission)? {
                        return Ok((true, deps));
                    }
                }
            }
            Ok((false, deps))
        })
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Whether the identity is actively bound to the group.
    pub fn member_of(
        &self,
        identity: impl Into<EntityArg>,
        group: impl Into<EntityArg>,
    ) -> Result<bool> {
        let identity = self.resolve_identity(identity.into())?;
        let group = self.resolve_group(group.into())?;
        self.is_member(&group, &identity, false)
    }

    /// Whether the identity is bound to the group, active or not.
    pub fn member_of_including_inactive(
        &self,
        identity: impl Into<EntityArg>,
        group: impl Into<EntityArg>,
    ) -> Result<bool> {
        let identity = self.resolve_identity(identity.into())?;
        let group = self.resolve_group(group.into())?;
        self.is_member(&group, &identity, true)
    }

    /// Whether the identity is actively bound to every listed group. An
    /// empty list is `false`.
    pub fn member_of_all<I>(&self, identity: impl Into<EntityArg>, groups: I) -> Result<bool>
    where
        I: IntoIterator,
        I::Item: Into<EntityArg>,
    {
        let identity = self.resolve_identity(identity.into())?;
        let groups = groups
            .into_iter()
            .map(|group| self.resolve_group(group.into()))
            .collect::<Result<Vec<_>>>()?;
        if groups.is_empty() {
            return Ok(false);
        }
        for group in &groups {
            if !self.is_member(group, &identity, false)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn has_member(
        &self,
        group: impl Into<EntityArg>,
        identity: impl Into<EntityArg>,
        include_inactive: bool,
    ) -> Result<bool> {
        let group = self.resolve_group(group.into())?;
        let identity = self.resolve_identity(identity.into())?;
        self.is_member(&group, &identity, include_inactive)
    }

    /// Whether every listed identity is bound to the group. An empty list
    /// is `false`.
    pub fn has_members<I>(
        &self,
        group: impl Into<EntityArg>,
        identities: I,
        include_inactive: bool,
    ) -> Result<bool>
    where
        I: IntoIterator,
        I::Item: Into<EntityArg>,
    {
        let group = self.resolve_group(group.into())?;
        let identities = identities
            .into_iter()
            .map(|identity| self.resolve_identity(identity.into()))
            .collect::<Result<Vec<_>>>()?;
        if identities.is_empty() {
            return Ok(false);
        }
        for identity in &identities {
            if !self.is_member(&group, identity, include_inactive)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn is_member(&self, group: &Group, identity: &Identity, include_inactive: bool) -> Result<bool> {
        let query = if include_inactive {
            HAS_MEMBER_ANY
        } else {
            HAS_MEMBER
        };
        let g = group.entity_ref();
        let i = identity.entity_ref();
        self.cached(&derived_pair_key(&g, query, &i), || {
            let bound = self
                .membership(&identity.key, &group.key)?
                .is_some_and(|binding| include_inactive || binding.active);
            Ok((bound, Dependencies::of([g.clone(), i.clone()])))
        })
    }

    /// Identities bound to the group, in key order.
    pub fn members_of(
        &self,
        group: impl Into<EntityArg>,
        include_inactive: bool,
    ) -> Result<Vec<Identity>> {
        let group = self.resolve_group(group.into())?;
        self.members_of_group(&group, include_inactive)
    }

    fn members_of_group(&self, group: &Group, include_inactive: bool) -> Result<Vec<Identity>> {
        let query = if include_inactive { MEMBERS_ANY } else { MEMBERS };
        let me = group.entity_ref();
        self.cached(&derived_key(&me, query), || {
            let mut members = Vec::new();
            for binding in self.memberships_of_group(&group.key)? {
                if !include_inactive && !binding.active {
                    continue;
                }
                if let Some(identity) = self.load_identity(&binding.identity)? {
                    members.push(identity);
                }
            }
            let mut deps = Dependencies::of([me.clone()]);
            deps.extend(members.iter().map(Identity::entity_ref));
            Ok((members, deps))
        })
    }

    /// Every subject holding the permission: its direct subjects plus the
    /// active members of each group it is granted to. Identities come
    /// before groups, each in key order.
    pub fn permission_holders(&self, permission: impl Into<EntityArg>) -> Result<Vec<Subject>> {
        let permission = self.resolve_permission(permission.into())?;
        let me = permission.entity_ref();
        self.cached(&derived_key(&me, HOLDERS), || {
            let mut holders = BTreeMap::new();
            for grant in self.grants_of(&permission.key)? {
                let Some(subject) = self.load_subject(&grant.subject)? else {
                    continue;
                };
                if let Subject::Group(group) = &subject {
                    for member in self.members_of_group(group, false)? {
                        holders.insert(member.entity_ref(), Subject::Identity(member));
                    }
                }
                holders.insert(subject.entity_ref(), subject);
            }
            let mut deps = Dependencies::of([me.clone()]);
            deps.extend(holders.keys().cloned());
            Ok((holders.into_values().collect(), deps))
        })
    }
}
