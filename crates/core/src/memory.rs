//! In-memory provider.
//!
//! Holds documents for a single authority and answers queries from them. It
//! keeps [`ProviderStats`] about every cursor it hands out, which makes it
//! the provider of choice for exercising the resolution protocol.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ProviderError;
use crate::provider::*;
use crate::uri::{DocumentRef, TreeUri};

type CloseHook = Box<dyn FnOnce() + Send>;

pub struct MemoryCursor {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    position: Option<usize>,
    loading: Option<String>,
    gate: Option<Arc<QueryGate>>,
    on_close: Option<CloseHook>,
}

impl MemoryCursor {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            position: None,
            loading: None,
            gate: None,
            on_close: None,
        }
    }

    pub fn with_loading(mut self, loading: impl Into<String>) -> Self {
        self.loading = Some(loading.into());
        self
    }

    /// Runs `hook` once when the cursor is released.
    pub fn on_close(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }

    fn with_gate(mut self, gate: Arc<QueryGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn cell(&self, column: usize) -> Option<&Value> {
        self.position
            .and_then(|row| self.rows.get(row))
            .and_then(|row| row.get(column))
    }
}

impl Cursor for MemoryCursor {
    fn column_names(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn move_to_next(&mut self) -> bool {
        if let Some(gate) = self.gate.take() {
            gate.pass();
        }
        let next = self.position.map_or(0, |p| p + 1);
        if next < self.rows.len() {
            self.position = Some(next);
            true
        } else {
            self.position = Some(self.rows.len());
            false
        }
    }

    fn get_string(&self, column: usize) -> Option<String> {
        match self.cell(column)? {
            Value::Null => None,
            Value::Integer(n) => Some(n.to_string()),
            Value::Text(s) => Some(s.clone()),
        }
    }

    fn get_long(&self, column: usize) -> i64 {
        match self.cell(column) {
            Some(Value::Integer(n)) => *n,
            Some(Value::Text(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    fn loading(&self) -> Option<String> {
        self.loading.clone()
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        if let Some(hook) = self.on_close.take() {
            hook();
        }
    }
}

/// Holds the first row read of a cursor until opened.
pub struct QueryGate {
    open: Mutex<bool>,
    cv: Condvar,
    arrived_tx: Sender<()>,
    arrived_rx: Receiver<()>,
}

impl QueryGate {
    fn new() -> Self {
        let (arrived_tx, arrived_rx) = bounded(1);
        Self {
            open: Mutex::new(false),
            cv: Condvar::new(),
            arrived_tx,
            arrived_rx,
        }
    }

    fn pass(&self) {
        let _ = self.arrived_tx.try_send(());
        let mut open = self.open.lock();
        while !*open {
            self.cv.wait(&mut open);
        }
    }

    /// Waits until a reader is parked at the gate.
    pub fn wait_arrival(&self, timeout: Duration) -> bool {
        self.arrived_rx.recv_timeout(timeout).is_ok()
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.cv.notify_all();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderStats {
    pub document_queries: u64,
    pub children_queries: u64,
    pub opened: u64,
    pub closed: u64,
}

impl ProviderStats {
    pub fn queries(&self) -> u64 {
        self.document_queries + self.children_queries
    }

    pub fn open_cursors(&self) -> u64 {
        self.opened - self.closed
    }
}

/// One document row as the provider stores it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryDocument {
    pub id: String,
    pub mime_type: Option<String>,
    pub display_name: Option<String>,
    pub last_modified: i64,
    pub flags: i64,
    pub size: i64,
}

impl MemoryDocument {
    pub fn file(id: &str, mime_type: &str, size: i64) -> Self {
        Self {
            id: id.to_string(),
            mime_type: Some(mime_type.to_string()),
            display_name: Some(id.to_string()),
            size,
            ..Default::default()
        }
    }

    pub fn directory(id: &str) -> Self {
        Self {
            id: id.to_string(),
            mime_type: Some(MIME_TYPE_DIR.to_string()),
            display_name: Some(id.to_string()),
            ..Default::default()
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.display_name = Some(name.to_string());
        self
    }

    pub fn modified(mut self, millis: i64) -> Self {
        self.last_modified = millis;
        self
    }

    pub fn flags(mut self, flags: i64) -> Self {
        self.flags = flags;
        self
    }

    fn cell(&self, column: &str) -> Value {
        match column {
            COLUMN_DOCUMENT_ID => Value::Text(self.id.clone()),
            COLUMN_MIME_TYPE => self.mime_type.clone().into(),
            COLUMN_DISPLAY_NAME => self.display_name.clone().into(),
            COLUMN_LAST_MODIFIED => Value::Integer(self.last_modified),
            COLUMN_FLAGS => Value::Integer(self.flags),
            COLUMN_SIZE => Value::Integer(self.size),
            _ => Value::Null,
        }
    }
}

#[derive(Default)]
struct Inner {
    documents: HashMap<String, MemoryDocument>,
    children: HashMap<String, Vec<String>>,
    parents: HashMap<String, String>,
    failing: HashSet<String>,
    omitted: HashSet<String>,
    gates: HashMap<String, Arc<QueryGate>>,
    loading: Option<String>,
    native_tree: Option<bool>,
}

/// Documents of one authority. A reference only sees a document when its
/// tree id is the document itself or one of its ancestors.
pub struct MemoryProvider {
    authority: String,
    inner: Mutex<Inner>,
    stats: Arc<Mutex<ProviderStats>>,
}

impl MemoryProvider {
    pub fn new(authority: &str) -> Self {
        Self {
            authority: authority.to_string(),
            inner: Mutex::new(Inner::default()),
            stats: Arc::new(Mutex::new(ProviderStats::default())),
        }
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn insert(&self, document: MemoryDocument) {
        self.inner
            .lock()
            .documents
            .insert(document.id.clone(), document);
    }

    /// Registers `child` and appends it to the children of `parent`.
    pub fn insert_child(&self, parent: &str, child: MemoryDocument) {
        let mut inner = self.inner.lock();
        inner
            .children
            .entry(parent.to_string())
            .or_default()
            .push(child.id.clone());
        inner.parents.insert(child.id.clone(), parent.to_string());
        inner.documents.insert(child.id.clone(), child);
    }

    /// Makes every query touching `id` fail.
    pub fn fail_queries_for(&self, id: &str) {
        self.inner.lock().failing.insert(id.to_string());
    }

    /// Leaves `column` out of every result set.
    pub fn omit_column(&self, column: &str) {
        self.inner.lock().omitted.insert(column.to_string());
    }

    /// Attaches a "still loading" extra to children results.
    pub fn set_loading(&self, message: &str) {
        self.inner.lock().loading = Some(message.to_string());
    }

    pub fn set_native_tree_predicate(&self, answer: Option<bool>) {
        self.inner.lock().native_tree = answer;
    }

    /// Parks the reader of the children of `parent` until the gate opens.
    pub fn gate_children(&self, parent: &str) -> Arc<QueryGate> {
        let gate = Arc::new(QueryGate::new());
        self.inner
            .lock()
            .gates
            .insert(parent.to_string(), gate.clone());
        gate
    }

    pub fn stats(&self) -> ProviderStats {
        *self.stats.lock()
    }

    fn cursor(&self, inner: &Inner, rows: Vec<&MemoryDocument>) -> MemoryCursor {
        let columns: Vec<String> = ALL_COLUMNS
            .iter()
            .filter(|c| !inner.omitted.contains(**c))
            .map(|c| c.to_string())
            .collect();
        let rows: Vec<Vec<Value>> = rows
            .into_iter()
            .map(|doc| columns.iter().map(|c| doc.cell(c)).collect())
            .collect();

        self.stats.lock().opened += 1;
        let stats = self.stats.clone();
        MemoryCursor::new(columns, rows).on_close(move || stats.lock().closed += 1)
    }

    fn in_scope(&self, inner: &Inner, document: &DocumentRef) -> bool {
        if document.authority() != self.authority {
            return false;
        }
        let mut id = document.document_id();
        // bounded walk up the parent links
        for _ in 0..=inner.parents.len() {
            if id == document.tree_id() {
                return true;
            }
            match inner.parents.get(id) {
                Some(parent) => id = parent,
                None => return false,
            }
        }
        false
    }

    fn check_failing(&self, inner: &Inner, document: &DocumentRef) -> Result<(), ProviderError> {
        if inner.failing.contains(document.document_id()) {
            return Err(ProviderError::Query {
                uri: document.to_uri(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl DocumentProvider for MemoryProvider {
    fn query_document(
        &self,
        document: &DocumentRef,
    ) -> Result<Option<Box<dyn Cursor>>, ProviderError> {
        self.stats.lock().document_queries += 1;
        let inner = self.inner.lock();
        self.check_failing(&inner, document)?;
        let rows = if self.in_scope(&inner, document) {
            inner.documents.get(document.document_id()).into_iter().collect()
        } else {
            Vec::new()
        };
        Ok(Some(Box::new(self.cursor(&inner, rows))))
    }

    fn query_children(
        &self,
        parent: &DocumentRef,
    ) -> Result<Option<Box<dyn Cursor>>, ProviderError> {
        self.stats.lock().children_queries += 1;
        let inner = self.inner.lock();
        self.check_failing(&inner, parent)?;
        let rows = inner
            .children
            .get(parent.document_id())
            .filter(|_| self.in_scope(&inner, parent))
            .map(|ids| ids.iter().filter_map(|id| inner.documents.get(id)).collect())
            .unwrap_or_default();

        let mut cursor = self.cursor(&inner, rows);
        if let Some(loading) = &inner.loading {
            cursor = cursor.with_loading(loading.clone());
        }
        if let Some(gate) = inner.gates.get(parent.document_id()) {
            cursor = cursor.with_gate(gate.clone());
        }
        Ok(Some(Box::new(cursor)))
    }

    fn is_tree_uri(&self, _uri: &TreeUri) -> Option<bool> {
        self.inner.lock().native_tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn cursor_starts_before_first_row() {
        let mut cursor = MemoryCursor::new(
            vec!["n".into(), "s".into()],
            vec![vec![Value::Integer(7), "x".into()]],
        );
        assert_eq!(cursor.get_long(0), 0);
        assert!(cursor.move_to_next());
        assert_eq!(cursor.get_long(0), 7);
        assert_eq!(cursor.get_string(1).as_deref(), Some("x"));
        assert_eq!(cursor.get_string(5), None);
        assert!(!cursor.move_to_next());
        assert!(!cursor.move_to_next());
    }

    #[test]
    fn close_hook_runs_on_drop() {
        let closed = Arc::new(AtomicBool::new(false));
        let flag = closed.clone();
        let cursor =
            MemoryCursor::new(vec![], vec![]).on_close(move || flag.store(true, Ordering::SeqCst));
        drop(cursor);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn omitted_columns_are_absent() {
        let provider = MemoryProvider::new("auth");
        provider.insert(MemoryDocument::file("a", "text/plain", 3));
        provider.omit_column(COLUMN_SIZE);
        let cursor = provider
            .query_document(&DocumentRef::new("auth", "a", "a"))
            .unwrap()
            .unwrap();
        assert_eq!(cursor.column_index(COLUMN_SIZE), None);
        assert_eq!(cursor.column_index(COLUMN_DOCUMENT_ID), Some(0));
        drop(cursor);
        assert_eq!(provider.stats().open_cursors(), 0);
    }

    #[test]
    fn children_preserve_insertion_order() {
        let provider = MemoryProvider::new("auth");
        provider.insert(MemoryDocument::directory("root"));
        for id in ["c", "a", "b"] {
            provider.insert_child("root", MemoryDocument::file(id, "text/plain", 1));
        }
        let mut cursor = provider
            .query_children(&DocumentRef::new("auth", "root", "root"))
            .unwrap()
            .unwrap();
        let mut ids = Vec::new();
        while cursor.move_to_next() {
            ids.push(cursor.get_string(0).unwrap());
        }
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[test]
    fn foreign_scopes_see_no_rows() {
        let provider = MemoryProvider::new("auth");
        provider.insert(MemoryDocument::directory("root"));
        provider.insert_child("root", MemoryDocument::directory("sub"));
        provider.insert_child("sub", MemoryDocument::file("leaf", "text/plain", 1));
        provider.insert(MemoryDocument::directory("other"));

        let count = |mut cursor: Box<dyn Cursor>| {
            let mut n = 0;
            while cursor.move_to_next() {
                n += 1;
            }
            n
        };
        let query_doc = |r: DocumentRef| count(provider.query_document(&r).unwrap().unwrap());
        let query_children = |r: DocumentRef| count(provider.query_children(&r).unwrap().unwrap());

        assert_eq!(query_doc(DocumentRef::new("auth", "root", "leaf")), 1);
        assert_eq!(query_children(DocumentRef::new("auth", "root", "sub")), 1);
        assert_eq!(query_children(DocumentRef::new("auth", "sub", "sub")), 1);

        assert_eq!(query_doc(DocumentRef::new("elsewhere", "root", "root")), 0);
        assert_eq!(query_children(DocumentRef::new("elsewhere", "root", "root")), 0);
        assert_eq!(query_doc(DocumentRef::new("auth", "other", "leaf")), 0);
        assert_eq!(query_children(DocumentRef::new("auth", "sub", "root")), 0);
        assert_eq!(provider.stats().open_cursors(), 0);
    }
}
