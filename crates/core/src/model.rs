use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::*;
use crate::uri::DocumentRef;

/// Capability bits reported by the provider. Stored as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Flags(pub u64);

impl Flags {
    pub const SUPPORTS_THUMBNAIL: Flags = Flags(1);
    pub const SUPPORTS_WRITE: Flags = Flags(1 << 1);
    pub const SUPPORTS_DELETE: Flags = Flags(1 << 2);
    pub const DIR_SUPPORTS_CREATE: Flags = Flags(1 << 3);
    pub const DIR_PREFERS_GRID: Flags = Flags(1 << 4);
    pub const DIR_PREFERS_LAST_MODIFIED: Flags = Flags(1 << 5);
    pub const SUPPORTS_RENAME: Flags = Flags(1 << 6);
    pub const SUPPORTS_COPY: Flags = Flags(1 << 7);
    pub const SUPPORTS_MOVE: Flags = Flags(1 << 8);
    pub const VIRTUAL_DOCUMENT: Flags = Flags(1 << 9);
    pub const SUPPORTS_REMOVE: Flags = Flags(1 << 10);

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u64 {
        self.0
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// Column positions of the metadata fields in one result set.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Columns {
    id: Option<usize>,
    mime_type: Option<usize>,
    display_name: Option<usize>,
    last_modified: Option<usize>,
    flags: Option<usize>,
    size: Option<usize>,
}

impl Columns {
    pub(crate) fn of(cursor: &dyn Cursor) -> Self {
        let names = cursor.column_names();
        let index = |name: &str| names.iter().position(|c| c == name);
        Self {
            id: index(COLUMN_DOCUMENT_ID),
            mime_type: index(COLUMN_MIME_TYPE),
            display_name: index(COLUMN_DISPLAY_NAME),
            last_modified: index(COLUMN_LAST_MODIFIED),
            flags: index(COLUMN_FLAGS),
            size: index(COLUMN_SIZE),
        }
    }
}

/// One metadata row. Absent string columns read as `None`, numeric ones as 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Metadata {
    pub id: Option<String>,
    pub mime_type: Option<String>,
    pub display_name: Option<String>,
    pub last_modified: i64,
    pub flags: Flags,
    pub size: u64,
}

impl Metadata {
    /// Reads the current row of `cursor`.
    pub(crate) fn read(cursor: &dyn Cursor, columns: &Columns) -> Self {
        let string = |col: Option<usize>| col.and_then(|c| cursor.get_string(c));
        let long = |col: Option<usize>| col.map_or(0, |c| cursor.get_long(c));
        Self {
            id: string(columns.id),
            mime_type: string(columns.mime_type),
            display_name: string(columns.display_name),
            last_modified: long(columns.last_modified),
            flags: Flags(long(columns.flags) as u64),
            size: long(columns.size).max(0) as u64,
        }
    }

    pub(crate) fn is_directory(&self) -> bool {
        self.mime_type.as_deref() == Some(MIME_TYPE_DIR)
    }
}

/// A resolved document and the snapshot of its children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentNode {
    reference: DocumentRef,
    id: String,
    display_name: Option<String>,
    mime_type: Option<String>,
    last_modified: i64,
    flags: Flags,
    size: u64,
    expanded: bool,
    children: Vec<DocumentNode>,
}

impl DocumentNode {
    /// `children` is `None` when the node was not expanded.
    pub(crate) fn new(
        reference: DocumentRef,
        id: String,
        meta: Metadata,
        children: Option<Vec<DocumentNode>>,
    ) -> Self {
        Self {
            reference,
            id,
            display_name: meta.display_name,
            mime_type: meta.mime_type,
            last_modified: meta.last_modified,
            flags: meta.flags,
            size: meta.size,
            expanded: children.is_some(),
            children: children.unwrap_or_default(),
        }
    }

    pub fn reference(&self) -> &DocumentRef {
        &self.reference
    }

    pub fn uri(&self) -> String {
        self.reference.to_uri()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn last_modified(&self) -> i64 {
        self.last_modified
    }

    /// `last_modified` as a timestamp, read as epoch milliseconds.
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        if self.last_modified == 0 {
            return None;
        }
        Utc.timestamp_millis_opt(self.last_modified).single()
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_directory(&self) -> bool {
        self.mime_type.as_deref() == Some(MIME_TYPE_DIR)
    }

    pub fn is_file(&self) -> bool {
        !self.is_directory() && self.mime_type.as_deref().is_some_and(|m| !m.is_empty())
    }

    pub fn can_write(&self) -> bool {
        if self.flags.contains(Flags::SUPPORTS_WRITE) {
            return true;
        }
        self.is_directory() && self.flags.contains(Flags::DIR_SUPPORTS_CREATE)
    }

    pub fn can_delete(&self) -> bool {
        self.flags.contains(Flags::SUPPORTS_DELETE)
    }

    /// False for directories that were left beyond the resolve depth.
    pub fn expanded(&self) -> bool {
        self.expanded || !self.is_directory()
    }

    pub fn children(&self) -> &[DocumentNode] {
        &self.children
    }

    pub fn list_files(&self) -> &[DocumentNode] {
        self.children()
    }

    /// Writes are not supported; always reports failure.
    pub fn rename(&self, _display_name: &str) -> bool {
        false
    }

    /// Pre-order traversal of this node and its materialized descendants.
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }

    pub fn find(&self, id: &str) -> Option<&DocumentNode> {
        self.walk().find(|n| n.id == id)
    }
}

pub struct Walk<'a> {
    stack: Vec<&'a DocumentNode>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a DocumentNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, mime: Option<&str>, children: Option<Vec<DocumentNode>>) -> DocumentNode {
        let meta = Metadata {
            id: Some(id.to_string()),
            mime_type: mime.map(str::to_string),
            ..Default::default()
        };
        DocumentNode::new(DocumentRef::new("a", "t", id), id.to_string(), meta, children)
    }

    #[test]
    fn classification_follows_mime_type() {
        let dir = node("d", Some(MIME_TYPE_DIR), Some(vec![]));
        assert!(dir.is_directory());
        assert!(!dir.is_file());

        let file = node("f", Some("text/plain"), None);
        assert!(file.is_file());
        assert!(!file.is_directory());

        for mime in [None, Some("")] {
            let neither = node("n", mime, None);
            assert!(!neither.is_file());
            assert!(!neither.is_directory());
        }
    }

    #[test]
    fn walk_is_pre_order() {
        let tree = node(
            "r",
            Some(MIME_TYPE_DIR),
            Some(vec![
                node("a", Some(MIME_TYPE_DIR), Some(vec![node("a1", Some("x/y"), None)])),
                node("b", Some("x/y"), None),
            ]),
        );
        let ids: Vec<&str> = tree.walk().map(|n| n.id()).collect();
        assert_eq!(ids, ["r", "a", "a1", "b"]);
        assert_eq!(tree.find("a1").map(|n| n.id()), Some("a1"));
        assert!(tree.find("zz").is_none());
    }

    #[test]
    fn unexpanded_directory() {
        let dir = node("d", Some(MIME_TYPE_DIR), None);
        assert!(!dir.expanded());
        assert!(dir.children().is_empty());
        assert!(node("f", Some("text/plain"), None).expanded());
    }

    #[test]
    fn flags_and_modified() {
        let meta = Metadata {
            mime_type: Some(MIME_TYPE_DIR.to_string()),
            flags: Flags::DIR_SUPPORTS_CREATE,
            last_modified: 1_600_000_000_000,
            ..Default::default()
        };
        let dir = DocumentNode::new(DocumentRef::new("a", "t", "d"), "d".into(), meta, None);
        assert!(dir.can_write());
        assert!(!dir.can_delete());
        assert_eq!(dir.modified().map(|t| t.timestamp()), Some(1_600_000_000));
        assert!(!dir.rename("x"));

        let plain = node("f", Some("text/plain"), None);
        assert_eq!(plain.modified(), None);
        assert!(!plain.can_write());
    }

    #[test]
    fn flags_bit_ops() {
        let f = Flags::SUPPORTS_WRITE | Flags::SUPPORTS_DELETE;
        assert!(f.contains(Flags::SUPPORTS_WRITE));
        assert!(!f.contains(Flags::SUPPORTS_MOVE));
        assert_eq!(f.bits(), 6);
    }
}
