//! Opaque document references.
//!
//! A provider addresses documents with content URIs of the form
//! `content://{authority}/tree/{tree_id}/document/{document_id}`. Inside the
//! crate the pair of tree scope and document id is carried as a
//! [`DocumentRef`], so a child can only be addressed through its own id.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::error::{ResolveError, Result};

pub const SCHEME: &str = "content";
const PATH_TREE: &str = "tree";
const PATH_DOCUMENT: &str = "document";
const PATH_CHILDREN: &str = "children";

/// Characters left untouched when an id is written into a path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// A parsed, not yet classified reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeUri {
    url: Url,
}

impl TreeUri {
    /// Parses `reference`; anything that is not an absolute URI yields `None`.
    pub fn parse(reference: &str) -> Option<Self> {
        Url::parse(reference).ok().map(|url| Self { url })
    }

    pub fn authority(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Non-empty, percent-decoded path segments.
    pub fn path_segments(&self) -> Vec<String> {
        self.url
            .path_segments()
            .map(|segments| {
                segments
                    .filter(|s| !s.is_empty())
                    .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The root document id of the tree, i.e. the segment after `tree`.
    pub fn tree_document_id(&self) -> Option<String> {
        let mut segments = self.path_segments().into_iter();
        match (segments.next(), segments.next()) {
            (Some(first), Some(id)) if first == PATH_TREE => Some(id),
            _ => None,
        }
    }

    /// Canonical reference of the document at the root of this tree.
    pub fn root_document(&self) -> Result<DocumentRef> {
        let tree_id = self
            .tree_document_id()
            .ok_or_else(|| ResolveError::MalformedReference {
                reference: self.url.to_string(),
            })?;
        Ok(DocumentRef::new(self.authority(), tree_id.clone(), tree_id))
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Display for TreeUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Structural tree-handle test: at least two path segments, the first `tree`.
pub fn has_tree_shape(uri: &TreeUri) -> bool {
    let segments = uri.path_segments();
    segments.len() >= 2 && segments[0] == PATH_TREE
}

/// Classifies `reference` as a tree handle.
///
/// A native answer from the provider wins; otherwise the structural rule is
/// applied. Malformed references are simply not trees.
pub fn is_tree_uri(reference: &str, native: impl FnOnce(&TreeUri) -> Option<bool>) -> bool {
    match TreeUri::parse(reference) {
        Some(uri) => native(&uri).unwrap_or_else(|| has_tree_shape(&uri)),
        None => false,
    }
}

/// Compound key of a document: the tree scope it was reached through and its
/// own provider-assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    authority: String,
    tree_id: String,
    document_id: String,
}

impl DocumentRef {
    pub fn new(
        authority: impl Into<String>,
        tree_id: impl Into<String>,
        document_id: impl Into<String>,
    ) -> Self {
        Self {
            authority: authority.into(),
            tree_id: tree_id.into(),
            document_id: document_id.into(),
        }
    }

    /// Builds the tree URI a caller would hand to the resolver.
    pub fn tree_uri(authority: &str, tree_id: &str) -> String {
        format!(
            "{SCHEME}://{authority}/{PATH_TREE}/{}",
            utf8_percent_encode(tree_id, SEGMENT)
        )
    }

    /// Parses `content://{authority}/tree/{tree}/document/{doc}`.
    pub fn parse(reference: &str) -> Option<Self> {
        let uri = TreeUri::parse(reference)?;
        let segments = uri.path_segments();
        match segments.as_slice() {
            [tree, tree_id, document, document_id, ..]
                if tree == PATH_TREE && document == PATH_DOCUMENT =>
            {
                Some(Self::new(uri.authority(), tree_id.clone(), document_id.clone()))
            }
            _ => None,
        }
    }

    /// Reference to a document in the same tree scope.
    pub fn child(&self, document_id: impl Into<String>) -> Self {
        Self::new(self.authority.clone(), self.tree_id.clone(), document_id)
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn tree_id(&self) -> &str {
        &self.tree_id
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn to_uri(&self) -> String {
        format!(
            "{SCHEME}://{}/{PATH_TREE}/{}/{PATH_DOCUMENT}/{}",
            self.authority,
            utf8_percent_encode(&self.tree_id, SEGMENT),
            utf8_percent_encode(&self.document_id, SEGMENT)
        )
    }

    /// URI of the children listing of this document.
    pub fn children_uri(&self) -> String {
        format!("{}/{PATH_CHILDREN}", self.to_uri())
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_rule() {
        let none = |_: &TreeUri| None;
        assert!(is_tree_uri("content://com.example/tree/primary%3A", none));
        assert!(is_tree_uri("content://com.example/tree/a/document/b", none));
        assert!(!is_tree_uri("content://com.example/tree", none));
        assert!(!is_tree_uri("content://com.example/tree/", none));
        assert!(!is_tree_uri("content://com.example/document/a", none));
        assert!(!is_tree_uri("content://com.example/trees/a", none));
        assert!(!is_tree_uri("not a uri", none));
        assert!(!is_tree_uri("", none));
        assert!(!is_tree_uri("mailto:tree/a", none));
    }

    #[test]
    fn native_predicate_wins() {
        assert!(!is_tree_uri("content://x/tree/a", |_| Some(false)));
        assert!(is_tree_uri("content://x/other/a", |_| Some(true)));
    }

    #[test]
    fn root_document_uses_tree_id() {
        let uri = TreeUri::parse("content://com.example/tree/primary%3ADownload").unwrap();
        let root = uri.root_document().unwrap();
        assert_eq!(root.authority(), "com.example");
        assert_eq!(root.tree_id(), "primary:Download");
        assert_eq!(root.document_id(), "primary:Download");
        assert_eq!(
            root.to_uri(),
            "content://com.example/tree/primary%3ADownload/document/primary%3ADownload"
        );
    }

    #[test]
    fn root_document_rejects_non_tree() {
        let uri = TreeUri::parse("content://com.example/document/a").unwrap();
        assert!(matches!(
            uri.root_document(),
            Err(ResolveError::MalformedReference { .. })
        ));
    }

    #[test]
    fn child_keeps_scope_and_takes_own_id() {
        let parent = DocumentRef::new("auth", "root", "root");
        let child = parent.child("root/a b");
        assert_eq!(child.tree_id(), "root");
        assert_eq!(child.document_id(), "root/a b");
        assert_ne!(child, parent);
        assert_eq!(
            child.children_uri(),
            "content://auth/tree/root/document/root%2Fa%20b/children"
        );
    }

    #[test]
    fn parse_round_trips_document_uri() {
        let doc = DocumentRef::new("auth", "local:", "local:docs/x.txt");
        assert_eq!(DocumentRef::parse(&doc.to_uri()), Some(doc));
        assert_eq!(DocumentRef::parse("content://auth/tree/a"), None);
    }

    #[test]
    fn tree_uri_builder_is_classified_as_tree() {
        let reference = DocumentRef::tree_uri("auth", "local:");
        assert_eq!(reference, "content://auth/tree/local%3A");
        assert!(is_tree_uri(&reference, |_| None));
    }
}
