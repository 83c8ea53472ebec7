use crossbeam_channel::Sender;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::ResolveOptions;
use crate::error::{ResolveError, Result};
use crate::model::{Columns, DocumentNode, Metadata};
use crate::progress::ResolveProgress;
use crate::provider::{Cursor, DocumentProvider};
use crate::uri::{self, DocumentRef, TreeUri};

#[derive(Debug, Clone)]
pub enum ResolveMsg {
    Document {
        uri: String,
    },
    Children {
        parent: String,
        count: usize,
        loading: Option<String>,
    },
    Progress(ResolveProgress),
    Done(ResolveProgress),
    Failed(String),
}

/// Shared cancellation signal between a [`ResolveHandle`] and its background work.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        Ok(())
    }
}

/// Loads the document at `document` and materializes its children.
///
/// Blocks on provider queries; run it off any latency-sensitive thread.
pub fn load(
    provider: &dyn DocumentProvider,
    document: &DocumentRef,
    options: &ResolveOptions,
    cancel: &CancelFlag,
) -> Result<DocumentNode> {
    Session::new(provider, options, cancel, None).load_document(document)
}

/// State of one resolution, shared by the workers expanding it.
struct Session<'a> {
    provider: &'a dyn DocumentProvider,
    options: &'a ResolveOptions,
    cancel: &'a CancelFlag,
    events: Option<&'a Sender<ResolveMsg>>,
    progress: Mutex<ResolveProgress>,
}

impl<'a> Session<'a> {
    fn new(
        provider: &'a dyn DocumentProvider,
        options: &'a ResolveOptions,
        cancel: &'a CancelFlag,
        events: Option<&'a Sender<ResolveMsg>>,
    ) -> Self {
        Self {
            provider,
            options,
            cancel,
            events,
            progress: Mutex::new(ResolveProgress::default()),
        }
    }

    fn send(&self, msg: ResolveMsg) {
        if let Some(tx) = self.events {
            let _ = tx.send(msg);
        }
    }

    fn progress(&self) -> ResolveProgress {
        *self.progress.lock()
    }

    fn record(&self, meta: &Metadata) {
        let snapshot = {
            let mut progress = self.progress.lock();
            progress.record(meta.is_directory(), meta.size);
            *progress
        };
        if self.options.emit_progress {
            self.send(ResolveMsg::Progress(snapshot));
        }
    }

    fn dump_row(&self, cursor: &dyn Cursor) {
        if !self.options.trace_columns {
            return;
        }
        let row: Vec<(String, Option<String>)> = cursor
            .column_names()
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name, cursor.get_string(i)))
            .collect();
        trace!(?row, "row");
    }

    #[tracing::instrument(level = "debug", skip_all, fields(uri = %document))]
    fn load_document(&self, document: &DocumentRef) -> Result<DocumentNode> {
        self.cancel.check()?;
        let not_positioned = || ResolveError::NotPositioned {
            uri: document.to_uri(),
        };

        let meta = {
            let mut cursor = self
                .provider
                .query_document(document)?
                .ok_or_else(not_positioned)?;
            if !cursor.move_to_next() {
                return Err(not_positioned());
            }
            self.dump_row(cursor.as_ref());
            Metadata::read(cursor.as_ref(), &Columns::of(cursor.as_ref()))
        };
        debug!(mime_type = ?meta.mime_type, "document row read");
        self.send(ResolveMsg::Document {
            uri: document.to_uri(),
        });

        let id = meta
            .id
            .clone()
            .unwrap_or_else(|| document.document_id().to_string());
        // the root directory is always listed, even at depth 0
        self.build(document.clone(), id, meta, self.options.depth.max(1))
    }

    /// Turns a metadata row into a node, expanding directories while `depth` allows.
    fn build(
        &self,
        reference: DocumentRef,
        id: String,
        meta: Metadata,
        depth: usize,
    ) -> Result<DocumentNode> {
        self.record(&meta);
        let children = if !meta.is_directory() {
            Some(Vec::new())
        } else if depth > 0 {
            Some(self.children(&reference, depth)?)
        } else {
            None
        };
        Ok(DocumentNode::new(reference, id, meta, children))
    }

    fn children(&self, parent: &DocumentRef, depth: usize) -> Result<Vec<DocumentNode>> {
        self.cancel.check()?;
        let rows = {
            let Some(mut cursor) = self.provider.query_children(parent)? else {
                return Ok(Vec::new());
            };
            let loading = cursor.loading();
            if let Some(loading) = &loading {
                debug!(parent = %parent, loading = %loading, "provider still loading children");
            }

            let columns = Columns::of(cursor.as_ref());
            let mut rows = Vec::new();
            while cursor.move_to_next() {
                self.cancel.check()?;
                self.dump_row(cursor.as_ref());
                let meta = Metadata::read(cursor.as_ref(), &columns);
                let id = meta
                    .id
                    .clone()
                    .ok_or_else(|| ResolveError::MissingDocumentId {
                        uri: parent.children_uri(),
                    })?;
                rows.push((parent.child(id.as_str()), id, meta));
            }
            self.send(ResolveMsg::Children {
                parent: parent.to_uri(),
                count: rows.len(),
                loading,
            });
            rows
        };
        debug!(parent = %parent, count = rows.len(), "children read");

        let depth = depth - 1;
        if depth == 0 {
            rows.into_iter()
                .map(|(reference, id, meta)| self.build(reference, id, meta, 0))
                .collect()
        } else {
            rows.into_par_iter()
                .map(|(reference, id, meta)| self.build(reference, id, meta, depth))
                .collect()
        }
    }
}

/// Entry point: turns an opaque tree reference into a [`DocumentNode`] tree.
#[derive(Clone)]
pub struct TreeResolver {
    provider: Arc<dyn DocumentProvider>,
    options: ResolveOptions,
    events: Option<Sender<ResolveMsg>>,
}

impl TreeResolver {
    pub fn new(provider: Arc<dyn DocumentProvider>) -> Self {
        Self {
            provider,
            options: ResolveOptions::default(),
            events: None,
        }
    }

    pub fn with_options(mut self, options: ResolveOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_events(mut self, events: Sender<ResolveMsg>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    pub fn is_tree_uri(&self, reference: &str) -> bool {
        uri::is_tree_uri(reference, |u| self.provider.is_tree_uri(u))
    }

    /// Resolves `reference` on tokio's blocking pool.
    ///
    /// The returned handle belongs to the caller: awaiting it yields the root,
    /// `None` for references that are not tree handles, or the failure.
    /// Cancelling or dropping it stops the background work.
    pub fn resolve(&self, reference: &str) -> ResolveHandle {
        let cancel = CancelFlag::new();
        let root = match self.root_of(reference) {
            Ok(Some(root)) => root,
            other => return ResolveHandle::ready(other.map(|_| None), cancel),
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => return ResolveHandle::ready(Err(ResolveError::Task(e.to_string())), cancel),
        };

        let provider = self.provider.clone();
        let options = self.options.clone();
        let events = self.events.clone();
        let flag = cancel.clone();
        let join = runtime.spawn_blocking(move || {
            run(provider.as_ref(), &options, events.as_ref(), &root, &flag).map(Some)
        });
        ResolveHandle {
            cancel,
            state: State::Running(join),
        }
    }

    /// Same protocol as [`resolve`](Self::resolve), on the calling thread.
    pub fn resolve_blocking(
        &self,
        reference: &str,
        cancel: &CancelFlag,
    ) -> Result<Option<DocumentNode>> {
        match self.root_of(reference)? {
            Some(root) => run(
                self.provider.as_ref(),
                &self.options,
                self.events.as_ref(),
                &root,
                cancel,
            )
            .map(Some),
            None => Ok(None),
        }
    }

    fn root_of(&self, reference: &str) -> Result<Option<DocumentRef>> {
        if !self.is_tree_uri(reference) {
            debug!(reference, "not a tree handle");
            return Ok(None);
        }
        let tree = TreeUri::parse(reference).ok_or_else(|| ResolveError::MalformedReference {
            reference: reference.to_string(),
        })?;
        tree.root_document().map(Some)
    }
}

fn run(
    provider: &dyn DocumentProvider,
    options: &ResolveOptions,
    events: Option<&Sender<ResolveMsg>>,
    root: &DocumentRef,
    cancel: &CancelFlag,
) -> Result<DocumentNode> {
    let session = Session::new(provider, options, cancel, events);
    let result = session.load_document(root);
    match &result {
        Ok(_) => session.send(ResolveMsg::Done(session.progress())),
        Err(ResolveError::Cancelled) => warn!(uri = %root, "resolution cancelled"),
        Err(e) => session.send(ResolveMsg::Failed(e.to_string())),
    }
    result
}

enum State {
    Ready(Result<Option<DocumentNode>>),
    Running(JoinHandle<Result<Option<DocumentNode>>>),
    Done,
}

/// Caller-owned handle of one resolution. Completes exactly once.
pub struct ResolveHandle {
    cancel: CancelFlag,
    state: State,
}

impl ResolveHandle {
    fn ready(result: Result<Option<DocumentNode>>, cancel: CancelFlag) -> Self {
        Self {
            cancel,
            state: State::Ready(result),
        }
    }

    /// Stops the resolution. Idempotent, and a no-op once the result is
    /// available: a finished handle still yields its result when awaited.
    pub fn cancel(&self) {
        match &self.state {
            State::Done | State::Ready(_) => {}
            State::Running(join) if join.is_finished() => {}
            State::Running(join) => {
                self.cancel.cancel();
                join.abort();
            }
        }
    }

    /// A flag that cancels this resolution from elsewhere.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            State::Running(join) => join.is_finished(),
            _ => true,
        }
    }

    fn finish(&self, result: Result<Option<DocumentNode>>) -> Result<Option<DocumentNode>> {
        if self.cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        result
    }
}

impl Future for ResolveHandle {
    type Output = Result<Option<DocumentNode>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match std::mem::replace(&mut this.state, State::Done) {
            State::Ready(result) => Poll::Ready(this.finish(result)),
            State::Running(mut join) => match Pin::new(&mut join).poll(cx) {
                Poll::Pending => {
                    this.state = State::Running(join);
                    Poll::Pending
                }
                Poll::Ready(Ok(result)) => Poll::Ready(this.finish(result)),
                Poll::Ready(Err(e)) if e.is_cancelled() => Poll::Ready(Err(ResolveError::Cancelled)),
                Poll::Ready(Err(e)) => Poll::Ready(Err(ResolveError::Task(e.to_string()))),
            },
            State::Done => Poll::Ready(Err(ResolveError::Task(
                "resolve handle polled after completion".to_string(),
            ))),
        }
    }
}

impl Drop for ResolveHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryDocument, MemoryProvider};
    use crate::provider::MIME_TYPE_DIR;

    fn provider() -> MemoryProvider {
        let provider = MemoryProvider::new("auth");
        provider.insert(MemoryDocument::directory("root"));
        provider.insert_child("root", MemoryDocument::file("a", "text/plain", 10));
        provider.insert_child("root", MemoryDocument::directory("b"));
        provider.insert_child("b", MemoryDocument::file("b1", "image/png", 5));
        provider
    }

    #[test]
    fn load_reads_root_and_direct_children() {
        let provider = provider();
        let root = DocumentRef::new("auth", "root", "root");
        let node = load(&provider, &root, &ResolveOptions::default(), &CancelFlag::new()).unwrap();

        assert_eq!(node.mime_type(), Some(MIME_TYPE_DIR));
        let ids: Vec<&str> = node.children().iter().map(|c| c.id()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(node.children()[0].reference().document_id(), "a");
        assert!(!node.children()[1].expanded());
        // one document query, one children query
        assert_eq!(provider.stats().queries(), 2);
        assert_eq!(provider.stats().open_cursors(), 0);
    }

    #[test]
    fn deeper_depth_expands_grandchildren() {
        let provider = provider();
        let options = ResolveOptions {
            depth: 2,
            ..Default::default()
        };
        let root = DocumentRef::new("auth", "root", "root");
        let node = load(&provider, &root, &options, &CancelFlag::new()).unwrap();

        let b = &node.children()[1];
        assert!(b.expanded());
        assert_eq!(b.children().len(), 1);
        assert_eq!(b.children()[0].id(), "b1");
        assert_eq!(b.children()[0].reference().tree_id(), "root");
    }

    #[test]
    fn zero_depth_still_lists_root_children() {
        let provider = provider();
        let options = ResolveOptions {
            depth: 0,
            ..Default::default()
        };
        let root = DocumentRef::new("auth", "root", "root");
        let node = load(&provider, &root, &options, &CancelFlag::new()).unwrap();

        assert!(node.expanded());
        assert_eq!(node.children().len(), 2);
        assert!(!node.children()[1].expanded());
        assert_eq!(provider.stats().children_queries, 1);
    }

    #[test]
    fn cancelled_flag_stops_before_querying() {
        let provider = provider();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = load(
            &provider,
            &DocumentRef::new("auth", "root", "root"),
            &ResolveOptions::default(),
            &cancel,
        )
        .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(provider.stats().queries(), 0);
    }

    #[test]
    fn events_report_children_and_done() {
        let provider: Arc<dyn DocumentProvider> = Arc::new(provider());
        let (tx, rx) = crossbeam_channel::unbounded();
        let resolver = TreeResolver::new(provider).with_events(tx);
        let node = resolver
            .resolve_blocking("content://auth/tree/root", &CancelFlag::new())
            .unwrap()
            .unwrap();
        assert_eq!(node.children().len(), 2);

        let msgs: Vec<ResolveMsg> = rx.try_iter().collect();
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ResolveMsg::Children { count: 2, .. })));
        match msgs.last() {
            Some(ResolveMsg::Done(progress)) => {
                assert_eq!(progress.documents, 3);
                assert_eq!(progress.directories, 2);
                assert_eq!(progress.bytes, 10);
            }
            other => panic!("unexpected last message: {other:?}"),
        }
    }
}
