//! Organization-tag algebra: well-known tags, effective-set expansion, and
//! the parent-cycle check.
//!
//! Tag ids are compared byte-exactly everywhere. No case folding, no
//! normalization — `Eng` and `eng` are different tags.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::models::OrganizationTag;
use crate::traits::TagRepository;

/// Universal scope tag; part of every user's effective set.
pub const DEFAULT_TAG: &str = "DEFAULT";

/// Prefix of per-user private tags created at registration.
pub const PRIVATE_TAG_PREFIX: &str = "PRIVATE_";

/// The private tag id owned by `username`.
pub fn private_tag_id(username: &str) -> String {
    format!("{PRIVATE_TAG_PREFIX}{username}")
}

/// Whether `tag_id` is a per-user private tag.
pub fn is_private_tag(tag_id: &str) -> bool {
    tag_id.starts_with(PRIVATE_TAG_PREFIX)
}

/// Expand a user's assigned tags to the effective set: the assigned tags,
/// every transitive ancestor, and `DEFAULT`.
///
/// The walk is bounded by the observed forest depth; a repeated visit
/// (corrupt parent data forming a loop) stops that branch instead of
/// recursing forever.
pub async fn expand_effective_tags<R: TagRepository + ?Sized>(
    repo: &R,
    assigned: &[String],
) -> Result<BTreeSet<String>> {
    let mut effective: BTreeSet<String> = assigned.iter().cloned().collect();

    for tag_id in assigned {
        let mut visited: BTreeSet<String> = BTreeSet::new();
        visited.insert(tag_id.clone());

        let mut current = tag_id.clone();
        while let Some(tag) = repo.find_by_tag_id(&current).await? {
            let Some(parent) = tag.parent_tag.filter(|p| !p.is_empty()) else {
                break;
            };
            if !visited.insert(parent.clone()) {
                tracing::warn!(tag_id = %tag_id, parent = %parent, "Parent loop detected during tag expansion");
                break;
            }
            effective.insert(parent.clone());
            current = parent;
        }
    }

    effective.insert(DEFAULT_TAG.to_string());
    Ok(effective)
}

/// Whether re-parenting `tag_id` under `new_parent_id` would close a cycle.
///
/// Walks the proposed parent's ancestor chain (byte-exact id comparison)
/// and refuses if `tag_id` appears anywhere in it, including
/// `new_parent_id == tag_id` itself. A dangling parent reference ends the
/// walk.
pub async fn would_form_cycle<R: TagRepository + ?Sized>(
    repo: &R,
    tag_id: &str,
    new_parent_id: &str,
) -> Result<bool> {
    let mut current = new_parent_id.to_string();
    let mut visited: BTreeSet<String> = BTreeSet::new();

    while !current.is_empty() {
        if current == tag_id {
            return Ok(true);
        }
        if !visited.insert(current.clone()) {
            // Pre-existing loop above the proposed parent; re-parenting onto
            // it would only make things worse.
            return Ok(true);
        }
        match repo.find_by_tag_id(&current).await? {
            Some(OrganizationTag {
                parent_tag: Some(parent),
                ..
            }) if !parent.is_empty() => current = parent,
            _ => break,
        }
    }

    Ok(false)
}

/// Basic shape check for tag ids supplied by admins: non-empty, no
/// whitespace, within column bounds.
pub fn validate_tag_id(tag_id: &str) -> bool {
    !tag_id.is_empty() && tag_id.len() <= 64 && !tag_id.chars().any(|c| c.is_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory tag forest for exercising the walks.
    struct MemTags {
        tags: Mutex<HashMap<String, Option<String>>>,
    }

    impl MemTags {
        fn new(edges: &[(&str, Option<&str>)]) -> Self {
            Self {
                tags: Mutex::new(
                    edges
                        .iter()
                        .map(|(id, parent)| (id.to_string(), parent.map(String::from)))
                        .collect(),
                ),
            }
        }

        fn tag(id: &str, parent: Option<String>) -> OrganizationTag {
            OrganizationTag {
                id: 1,
                tag_id: id.to_string(),
                name: id.to_string(),
                description: None,
                parent_tag: parent,
                created_by: "admin".into(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }
        }
    }

    #[async_trait]
    impl TagRepository for MemTags {
        async fn find_by_tag_id(&self, tag_id: &str) -> Result<Option<OrganizationTag>> {
            Ok(self
                .tags
                .lock()
                .unwrap()
                .get(tag_id)
                .map(|parent| Self::tag(tag_id, parent.clone())))
        }

        async fn list(&self) -> Result<Vec<OrganizationTag>> {
            unimplemented!()
        }

        async fn exists(&self, tag_id: &str) -> Result<bool> {
            Ok(self.tags.lock().unwrap().contains_key(tag_id))
        }
    }

    #[tokio::test]
    async fn expansion_includes_ancestors_and_default() {
        // root -> mid -> leaf, user assigned {leaf}.
        let repo = MemTags::new(&[("root", None), ("mid", Some("root")), ("leaf", Some("mid"))]);
        let effective = expand_effective_tags(&repo, &["leaf".to_string()])
            .await
            .unwrap();
        let expected: BTreeSet<String> = ["leaf", "mid", "root", DEFAULT_TAG]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(effective, expected);
    }

    #[tokio::test]
    async fn expansion_of_empty_assignment_is_default_only() {
        let repo = MemTags::new(&[]);
        let effective = expand_effective_tags(&repo, &[]).await.unwrap();
        assert_eq!(effective.len(), 1);
        assert!(effective.contains(DEFAULT_TAG));
    }

    #[tokio::test]
    async fn expansion_survives_parent_loops() {
        // a -> b -> a: corrupt data must not hang the walk.
        let repo = MemTags::new(&[("a", Some("b")), ("b", Some("a"))]);
        let effective = expand_effective_tags(&repo, &["a".to_string()])
            .await
            .unwrap();
        assert!(effective.contains("a"));
        assert!(effective.contains("b"));
        assert!(effective.contains(DEFAULT_TAG));
    }

    #[tokio::test]
    async fn expansion_ignores_unknown_tags() {
        let repo = MemTags::new(&[]);
        let effective = expand_effective_tags(&repo, &["ghost".to_string()])
            .await
            .unwrap();
        assert!(effective.contains("ghost"));
        assert!(effective.contains(DEFAULT_TAG));
        assert_eq!(effective.len(), 2);
    }

    #[tokio::test]
    async fn cycle_check_refuses_self_parent() {
        let repo = MemTags::new(&[("a", None)]);
        assert!(would_form_cycle(&repo, "a", "a").await.unwrap());
    }

    #[tokio::test]
    async fn cycle_check_refuses_descendant_parent() {
        // root -> mid -> leaf; re-parenting root under leaf closes a cycle.
        let repo = MemTags::new(&[("root", None), ("mid", Some("root")), ("leaf", Some("mid"))]);
        assert!(would_form_cycle(&repo, "root", "leaf").await.unwrap());
        assert!(would_form_cycle(&repo, "root", "mid").await.unwrap());
    }

    #[tokio::test]
    async fn cycle_check_allows_sibling_parent() {
        let repo = MemTags::new(&[("root", None), ("a", Some("root")), ("b", Some("root"))]);
        assert!(!would_form_cycle(&repo, "a", "b").await.unwrap());
        assert!(!would_form_cycle(&repo, "a", "root").await.unwrap());
    }

    #[tokio::test]
    async fn cycle_check_is_byte_exact() {
        // Case differs, so no cycle: "Root" is not "root".
        let repo = MemTags::new(&[("root", None), ("Root", Some("root"))]);
        assert!(!would_form_cycle(&repo, "ROOT", "Root").await.unwrap());
        assert!(would_form_cycle(&repo, "root", "Root").await.unwrap());
    }

    #[test]
    fn private_tag_helpers() {
        assert_eq!(private_tag_id("alice"), "PRIVATE_alice");
        assert!(is_private_tag("PRIVATE_alice"));
        assert!(!is_private_tag("DEFAULT"));
        // Prefix check is byte-exact too.
        assert!(!is_private_tag("private_alice"));
    }

    #[test]
    fn tag_id_validation() {
        assert!(validate_tag_id("eng-platform"));
        assert!(!validate_tag_id(""));
        assert!(!validate_tag_id("has space"));
        assert!(!validate_tag_id(&"x".repeat(65)));
    }
}
