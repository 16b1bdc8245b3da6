//! Domain types: entities, references and binding records.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// The three kinds of entity in the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Identity,
    Group,
    Permission,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Identity => "identity",
            EntityKind::Group => "group",
            EntityKind::Permission => "permission",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-qualified key of an entity, e.g. `group:admins`.
///
/// Keys of different kinds never collide, so a ref is a safe cache
/// dependency handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub key: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }

    pub fn identity(key: impl Into<String>) -> Self {
        Self::new(EntityKind::Identity, key)
    }

    pub fn group(key: impl Into<String>) -> Self {
        Self::new(EntityKind::Group, key)
    }

    pub fn permission(key: impl Into<String>) -> Self {
        Self::new(EntityKind::Permission, key)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

/// Value of an identity attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Bytes(Vec<u8>),
}

impl AttrValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<i32> for AttrValue {
    fn from(v: i32) -> Self {
        AttrValue::Int(v.into())
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Text(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Text(v)
    }
}

impl From<Vec<u8>> for AttrValue {
    fn from(v: Vec<u8>) -> Self {
        AttrValue::Bytes(v)
    }
}

/// A principal identified by a normalized email address.
///
/// Equality and hashing use the key only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub(crate) key: String,
    pub(crate) email: String,
    pub(crate) active: bool,
    pub(crate) attributes: BTreeMap<String, AttrValue>,
}

impl Identity {
    /// Normalized (lowercased) email; the immutable key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Email as it was given at creation, trimmed.
    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn attributes(&self) -> &BTreeMap<String, AttrValue> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::identity(self.key.clone())
    }
}

/// A named collection of identities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub(crate) key: String,
    pub(crate) name: String,
    pub(crate) description: Option<String>,
}

impl Group {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::group(self.key.clone())
    }
}

/// A named capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub(crate) key: String,
    pub(crate) name: String,
    pub(crate) description: Option<String>,
}

impl Permission {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::permission(self.key.clone())
    }
}

macro_rules! eq_by_key {
    ($($ty:ty),*) => {$(
        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                self.key == other.key
            }
        }

        impl Eq for $ty {}

        impl Hash for $ty {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.key.hash(state);
            }
        }
    )*};
}

eq_by_key!(Identity, Group, Permission);

/// Key of something a permission can be granted to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubjectRef {
    Identity(String),
    Group(String),
}

impl SubjectRef {
    pub fn key(&self) -> &str {
        match self {
            SubjectRef::Identity(key) | SubjectRef::Group(key) => key,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            SubjectRef::Identity(_) => EntityKind::Identity,
            SubjectRef::Group(_) => EntityKind::Group,
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind(), self.key())
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.key())
    }
}

/// A resolved permission subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subject {
    Identity(Identity),
    Group(Group),
}

impl Subject {
    pub fn key(&self) -> &str {
        match self {
            Subject::Identity(identity) => identity.key(),
            Subject::Group(group) => group.key(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Subject::Identity(_) => EntityKind::Identity,
            Subject::Group(_) => EntityKind::Group,
        }
    }

    pub fn subject_ref(&self) -> SubjectRef {
        match self {
            Subject::Identity(identity) => SubjectRef::Identity(identity.key.clone()),
            Subject::Group(group) => SubjectRef::Group(group.key.clone()),
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind(), self.key())
    }
}

/// Identity-in-group binding.
///
/// `active` mirrors the identity's active flag; the propagator keeps the
/// two in step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MembershipBinding {
    pub identity: String,
    pub group: String,
    pub active: bool,
}

/// Permission-to-subject grant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionBinding {
    pub permission: String,
    pub subject: SubjectRef,
}

/// Any value accepted where an entity is expected: a loaded entity or a
/// reference by key.
#[derive(Debug, Clone)]
pub enum EntityArg {
    Identity(Identity),
    Group(Group),
    Permission(Permission),
    Ref(EntityRef),
}

impl EntityArg {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityArg::Identity(_) => EntityKind::Identity,
            EntityArg::Group(_) => EntityKind::Group,
            EntityArg::Permission(_) => EntityKind::Permission,
            EntityArg::Ref(r) => r.kind,
        }
    }

    /// The key this argument names, as given.
    pub fn key(&self) -> &str {
        match self {
            EntityArg::Identity(e) => e.key(),
            EntityArg::Group(e) => e.key(),
            EntityArg::Permission(e) => e.key(),
            EntityArg::Ref(r) => &r.key,
        }
    }
}

impl From<Identity> for EntityArg {
    fn from(v: Identity) -> Self {
        EntityArg::Identity(v)
    }
}

impl From<&Identity> for EntityArg {
    fn from(v: &Identity) -> Self {
        EntityArg::Identity(v.clone())
    }
}

impl From<Group> for EntityArg {
    fn from(v: Group) -> Self {
        EntityArg::Group(v)
    }
}

impl From<&Group> for EntityArg {
    fn from(v: &Group) -> Self {
        EntityArg::Group(v.clone())
    }
}

impl From<Permission> for EntityArg {
    fn from(v: Permission) -> Self {
        EntityArg::Permission(v)
    }
}

impl From<&Permission> for EntityArg {
    fn from(v: &Permission) -> Self {
        EntityArg::Permission(v.clone())
    }
}

impl From<EntityRef> for EntityArg {
    fn from(v: EntityRef) -> Self {
        EntityArg::Ref(v)
    }
}

impl From<&EntityRef> for EntityArg {
    fn from(v: &EntityRef) -> Self {
        EntityArg::Ref(v.clone())
    }
}

impl From<Subject> for EntityArg {
    fn from(v: Subject) -> Self {
        match v {
            Subject::Identity(identity) => EntityArg::Identity(identity),
            Subject::Group(group) => EntityArg::Group(group),
        }
    }
}

impl From<&Subject> for EntityArg {
    fn from(v: &Subject) -> Self {
        v.clone().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(key: &str, name: &str) -> Group {
        Group {
            key: key.to_string(),
            name: name.to_string(),
            description: None,
        }
    }

    #[test]
    fn test_entity_ref_display_is_kind_qualified() {
        assert_eq!(EntityRef::group("admins").to_string(), "group:admins");
        assert_ne!(EntityRef::group("x"), EntityRef::permission("x"));
    }

    #[test]
    fn test_entities_compare_by_key() {
        let a = group("admins", "Admins");
        let mut b = group("admins", "ADMINS");
        b.description = Some("changed".into());
        assert_eq!(a, b);
        assert_ne!(a, group("ops", "Admins"));
    }

    #[test]
    fn test_entity_arg_kind() {
        let arg: EntityArg = (&group("g", "g")).into();
        assert_eq!(arg.kind(), EntityKind::Group);
        let arg: EntityArg = EntityRef::permission("p").into();
        assert_eq!(arg.kind(), EntityKind::Permission);
        assert_eq!(arg.key(), "p");
    }

    #[test]
    fn test_attr_value_roundtrips_through_bincode() {
        let values = vec![
            AttrValue::from(7),
            AttrValue::from(1.5),
            AttrValue::from(true),
            AttrValue::from("x"),
        ];
        let bytes = bincode::serialize(&values).unwrap();
        let back: Vec<AttrValue> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(values, back);
    }
}
