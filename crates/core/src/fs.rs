//! Serves a local directory as a document tree.
//!
//! Document ids take the form `{volume}:{relative/path}`; the base directory
//! itself is `{volume}:`.

use std::fs::Metadata as FsMetadata;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

use crate::error::ProviderError;
use crate::memory::MemoryCursor;
use crate::model::Flags;
use crate::provider::*;
use crate::uri::{has_tree_shape, DocumentRef, TreeUri};

pub struct FsProvider {
    authority: String,
    volume: String,
    base: PathBuf,
}

impl FsProvider {
    pub fn new(authority: impl Into<String>, volume: impl Into<String>, base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            authority: authority.into(),
            volume: volume.into(),
            base: base.canonicalize().unwrap_or(base),
        }
    }

    pub fn root_id(&self) -> String {
        format!("{}:", self.volume)
    }

    /// The tree reference a caller resolves to reach the base directory.
    pub fn tree_uri(&self) -> String {
        DocumentRef::tree_uri(&self.authority, &self.root_id())
    }

    fn path_of(&self, id: &str) -> Result<PathBuf, ProviderError> {
        let invalid = || ProviderError::InvalidDocumentId(id.to_string());
        let relative = id
            .strip_prefix(self.volume.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .ok_or_else(invalid)?;
        let relative = Path::new(relative);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(invalid());
        }
        let path = self.base.join(relative);
        // intermediate symlinks must not lead outside the base
        if path != self.base {
            if let Some(real) = path.parent().and_then(|p| p.canonicalize().ok()) {
                if !real.starts_with(&self.base) {
                    return Err(invalid());
                }
            }
        }
        Ok(path)
    }

    fn id_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.base).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(format!("{}:{}", self.volume, parts.join("/")))
    }

    fn row(&self, id: String, path: &Path, md: &FsMetadata) -> Vec<Value> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.volume.clone());
        let mime_type = if md.is_dir() {
            MIME_TYPE_DIR.to_string()
        } else {
            mime_guess::from_path(path)
                .first_raw()
                .unwrap_or("application/octet-stream")
                .to_string()
        };
        let modified = md
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_millis() as i64);

        let mut flags = Flags::default();
        if !md.permissions().readonly() {
            flags = flags | Flags::SUPPORTS_WRITE | Flags::SUPPORTS_DELETE;
            if md.is_dir() {
                flags = flags | Flags::DIR_SUPPORTS_CREATE;
            }
        }
        let size = if md.is_dir() { 0 } else { md.len() as i64 };

        vec![
            Value::Text(id),
            Value::Text(mime_type),
            Value::Text(name),
            Value::Integer(modified),
            Value::Integer(flags.bits() as i64),
            Value::Integer(size),
        ]
    }

    fn cursor(rows: Vec<Vec<Value>>) -> Box<dyn Cursor> {
        let columns = ALL_COLUMNS.iter().map(|c| c.to_string()).collect();
        Box::new(MemoryCursor::new(columns, rows))
    }

    fn check_scope(&self, document: &DocumentRef) -> Result<(), ProviderError> {
        if document.authority() != self.authority {
            return Err(ProviderError::Query {
                uri: document.to_uri(),
                reason: format!("unknown authority, expected {}", self.authority),
            });
        }
        Ok(())
    }
}

impl DocumentProvider for FsProvider {
    fn query_document(
        &self,
        document: &DocumentRef,
    ) -> Result<Option<Box<dyn Cursor>>, ProviderError> {
        self.check_scope(document)?;
        let path = self.path_of(document.document_id())?;
        let rows = match std::fs::symlink_metadata(&path) {
            Ok(md) => vec![self.row(document.document_id().to_string(), &path, &md)],
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(Self::cursor(rows)))
    }

    fn query_children(
        &self,
        parent: &DocumentRef,
    ) -> Result<Option<Box<dyn Cursor>>, ProviderError> {
        self.check_scope(parent)?;
        let dir = self.path_of(parent.document_id())?;
        let is_dir = std::fs::symlink_metadata(&dir).map_or(false, |md| md.is_dir());
        if !is_dir {
            return Ok(Some(Self::cursor(Vec::new())));
        }

        let mut rows = Vec::new();
        let walker = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .follow_root_links(false)
            .sort_by_file_name();
        for entry in walker {
            let entry = entry.map_err(|e| ProviderError::Query {
                uri: parent.children_uri(),
                reason: e.to_string(),
            })?;
            let Some(id) = self.id_of(entry.path()) else {
                continue;
            };
            let md = entry.metadata().map_err(|e| ProviderError::Query {
                uri: parent.children_uri(),
                reason: e.to_string(),
            })?;
            rows.push(self.row(id, entry.path(), &md));
        }
        Ok(Some(Self::cursor(rows)))
    }

    fn is_tree_uri(&self, uri: &TreeUri) -> Option<bool> {
        if uri.authority() != self.authority {
            return None;
        }
        Some(has_tree_shape(uri))
    }
}
