//! The queryable data source a tree is resolved through.
//!
//! Providers answer row-oriented queries. A [`Cursor`] starts positioned
//! before its first row and is released when dropped, so every query is a
//! scoped acquisition.

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::uri::{DocumentRef, TreeUri};

pub const COLUMN_DOCUMENT_ID: &str = "document_id";
pub const COLUMN_MIME_TYPE: &str = "mime_type";
pub const COLUMN_DISPLAY_NAME: &str = "_display_name";
pub const COLUMN_LAST_MODIFIED: &str = "last_modified";
pub const COLUMN_FLAGS: &str = "flags";
pub const COLUMN_SIZE: &str = "_size";

/// Mime type marking a document as a directory.
pub const MIME_TYPE_DIR: &str = "vnd.android.document/directory";

pub const ALL_COLUMNS: [&str; 6] = [
    COLUMN_DOCUMENT_ID,
    COLUMN_MIME_TYPE,
    COLUMN_DISPLAY_NAME,
    COLUMN_LAST_MODIFIED,
    COLUMN_FLAGS,
    COLUMN_SIZE,
];

/// A single cell of an in-memory row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Text(String),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

pub trait Cursor: Send {
    fn column_names(&self) -> Vec<String>;

    /// Advances to the next row; the first call positions on the first row.
    fn move_to_next(&mut self) -> bool;

    fn get_string(&self, column: usize) -> Option<String>;

    /// Integer value of `column`, 0 when null or not numeric.
    fn get_long(&self, column: usize) -> i64;

    /// Side-channel "still loading" message attached by the provider.
    fn loading(&self) -> Option<String> {
        None
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names().iter().position(|c| c == name)
    }
}

pub trait DocumentProvider: Send + Sync {
    /// Metadata row of a single document. `Ok(None)` means the provider
    /// returned no cursor at all.
    fn query_document(&self, document: &DocumentRef)
        -> Result<Option<Box<dyn Cursor>>, ProviderError>;

    /// Rows of the direct children of `parent` within the same tree.
    fn query_children(&self, parent: &DocumentRef)
        -> Result<Option<Box<dyn Cursor>>, ProviderError>;

    /// Native tree-handle predicate, when the provider has one.
    fn is_tree_uri(&self, _uri: &TreeUri) -> Option<bool> {
        None
    }
}
