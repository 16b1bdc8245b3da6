//! Key normalization and the storage key layout for bindings.
//!
//! Binding keys are segments joined by the unit separator `\x1f`. Names
//! containing control characters are rejected at creation, so a segment can
//! never contain the separator and every prefix scan is exact.
//!
//! | key                                    | value                       |
//! |----------------------------------------|-----------------------------|
//! | `member␟<identity>␟<group>`            | bincode `MembershipBinding` |
//! | `member_of␟<group>␟<identity>`         | empty (reverse index)       |
//! | `grant␟<permission>␟<kind>:<subject>`  | bincode `PermissionBinding` |
//! | `granted␟<kind>:<subject>␟<permission>`| empty (reverse index)       |

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{AuthzError, Result};
use crate::types::SubjectRef;

pub(crate) const SEP: char = '\u{1f}';

// Dot-atom local part, DNS host labels, alphabetic TLD. Matched against
// the lowercased address.
const EMAIL_PATTERN: &str = r"^[a-z0-9!#$%&'*+/=?^_`{|}~-]+(\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}\.?$";

fn email_regex() -> &'static Regex {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    EMAIL_RE.get_or_init(|| Regex::new(EMAIL_PATTERN).expect("email pattern compiles"))
}

/// Trim and lowercase. Lookups use this without validation.
pub fn fold(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Normalize a group or permission name into its key.
pub fn normalize_name(raw: &str) -> Result<String> {
    let key = fold(raw);
    if key.is_empty() || key.chars().any(char::is_control) {
        return Err(AuthzError::InvalidName(raw.to_string()));
    }
    Ok(key)
}

/// Normalize an email into an identity key, optionally validating syntax.
pub fn normalize_email(raw: &str, validate: bool) -> Result<String> {
    let key = normalize_name(raw)?;
    if validate && !email_regex().is_match(&key) {
        return Err(AuthzError::InvalidAddress(raw.to_string()));
    }
    Ok(key)
}

pub fn is_valid_email(raw: &str) -> bool {
    normalize_email(raw, true).is_ok()
}

pub(crate) fn member_key(identity: &str, group: &str) -> Vec<u8> {
    format!("member{SEP}{identity}{SEP}{group}").into_bytes()
}

pub(crate) fn member_of_key(group: &str, identity: &str) -> Vec<u8> {
    format!("member_of{SEP}{group}{SEP}{identity}").into_bytes()
}

/// Prefix of every membership record of `identity`.
pub(crate) fn member_prefix(identity: &str) -> Vec<u8> {
    format!("member{SEP}{identity}{SEP}").into_bytes()
}

/// Prefix of every reverse membership entry of `group`.
pub(crate) fn member_of_prefix(group: &str) -> Vec<u8> {
    format!("member_of{SEP}{group}{SEP}").into_bytes()
}

pub(crate) fn grant_key(permission: &str, subject: &SubjectRef) -> Vec<u8> {
    format!("grant{SEP}{permission}{SEP}{subject}").into_bytes()
}

pub(crate) fn granted_key(subject: &SubjectRef, permission: &str) -> Vec<u8> {
    format!("granted{SEP}{subject}{SEP}{permission}").into_bytes()
}

pub(crate) fn grant_prefix(permission: &str) -> Vec<u8> {
    format!("grant{SEP}{permission}{SEP}").into_bytes()
}

pub(crate) fn granted_prefix(subject: &SubjectRef) -> Vec<u8> {
    format!("granted{SEP}{subject}{SEP}").into_bytes()
}

/// The trailing segment of a key found under `prefix`.
pub(crate) fn suffix_after(key: &[u8], prefix: &[u8]) -> Option<String> {
    key.strip_prefix(prefix)
        .and_then(|rest| std::str::from_utf8(rest).ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Admins ").unwrap(), "admins");
        assert!(matches!(normalize_name("   "), Err(AuthzError::InvalidName(_))));
        assert!(matches!(normalize_name("a\u{1f}b"), Err(AuthzError::InvalidName(_))));
    }

    #[test]
    fn test_email_validation() {
        assert_eq!(normalize_email("A@X.com", true).unwrap(), "a@x.com");
        assert!(is_valid_email("first.last+tag@mail.example.org"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a..b@x.com"));
        assert!(!is_valid_email("a@-x.com"));
        assert_eq!(normalize_email("not-an-email", false).unwrap(), "not-an-email");
    }

    #[test]
    fn test_member_prefixes_do_not_overlap() {
        let primary = member_key("a@x.com", "admins");
        let reverse = member_of_key("admins", "a@x.com");
        assert!(primary.starts_with(&member_prefix("a@x.com")));
        assert!(!reverse.starts_with(b"member\x1f"));
        assert_eq!(
            suffix_after(&reverse, &member_of_prefix("admins")).as_deref(),
            Some("a@x.com")
        );
    }

    #[test]
    fn test_grant_keys_qualify_subject_kind() {
        let by_identity = grant_key("deploy", &SubjectRef::Identity("ops".into()));
        let by_group = grant_key("deploy", &SubjectRef::Group("ops".into()));
        assert_ne!(by_identity, by_group);
        let reverse = granted_key(&SubjectRef::Group("ops".into()), "deploy");
        assert_eq!(
            suffix_after(&reverse, &granted_prefix(&SubjectRef::Group("ops".into()))).as_deref(),
            Some("deploy")
        );
    }
}
