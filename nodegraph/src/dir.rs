//! [`DirNode`]: a directory's listing, lazily loaded and cached in memory,
//! with mutations coalesced into a deferred, self-re-arming save.
//!
//! Loading follows a small state machine per node —
//! `Unloaded -> Loading -> Idle` (or `LoadError`, cached and handed to every
//! concurrent waiter) — so concurrent first-touches share one load rather
//! than racing independent ones. Saving follows a similar one —
//! `Idle -> Saving -> (Idle | SaveRequested -> Saving -> ...)` — so that
//! mutations arriving while a save is in flight are folded into the *next*
//! save rather than spawning one save per mutation.
//!
//! Every node tracks two epoch watermarks: `unsaved_local` (mutations to
//! this node's own listing not yet reflected in its persisted blob) and
//! `unsaved_global` (the coarse union of `unsaved_local` with every child's
//! own `unsaved_global`, i.e. "is there unpersisted work anywhere in this
//! subtree"). `sync()` waits for `unsaved_global` to become disjoint from a
//! snapshot taken at call time.
//!
//! Locks are always taken child-before-parent, matching the direction
//! mutations flow (a child's completed save walks up to its parent's
//! `persist_child_change`, never the reverse) — this repo never holds a
//! parent's lock while waiting on a child's.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::sync::{Notify, RwLock};

use vaultree_dircodec::{self as dircodec, Listing};
use vaultree_name::BlobName;

use crate::entry_point::EntryPointHandle;
use crate::epoch::EpochSet;
use crate::error::{NodeGraphError, NodeGraphResult};
use crate::iter::EntriesIterator;
use crate::metadata::MetadataMap;
use crate::node::Node;
use crate::root::RootPersistence;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Unloaded,
    Loading,
    Idle,
    Saving,
    SaveRequested,
    LoadError,
}

#[derive(Clone)]
struct Entry {
    node: Node,
    child_blob_name: String,
    child_key: String,
    metadata: MetadataMap,
    /// This child's own `unsaved_global` as of its most recent save
    /// completion, used to recompute this node's `unsaved_global` precisely
    /// whenever this node itself saves.
    unsaved_epoch_set: EpochSet,
}

struct DirState {
    phase: Phase,
    load_error: Option<NodeGraphError>,
    entries: HashMap<String, Entry>,
    blob_name: String,
    key: String,
    unsaved_local: EpochSet,
    unsaved_global: EpochSet,
}

pub(crate) struct DirNodeShared {
    pub(crate) entry_point: EntryPointHandle,
    parent: RwLock<Option<Node>>,
    state: RwLock<DirState>,
    notify: Notify,
    /// Set only on the true root node by `EntryPoint::new`; lets the root's
    /// completed save persist `(blob_name, key)` externally, since the root
    /// has no parent to report to via `persist_child_change`.
    root_sink: RwLock<Option<Arc<dyn RootPersistence>>>,
}

/// A cheap, cloneable handle to a directory node. An empty `blob_name`
/// means the directory has never been saved (a brand new, empty directory).
#[derive(Clone)]
pub struct DirNode(pub(crate) Arc<DirNodeShared>);

impl DirNode {
    pub(crate) fn new(entry_point: EntryPointHandle, blob_name: String, key: String, parent: Option<Node>) -> Self {
        let phase = if blob_name.is_empty() { Phase::Idle } else { Phase::Unloaded };
        DirNode(Arc::new(DirNodeShared {
            entry_point,
            parent: RwLock::new(parent),
            state: RwLock::new(DirState {
                phase,
                load_error: None,
                entries: HashMap::new(),
                blob_name,
                key,
                unsaved_local: EpochSet::empty(),
                unsaved_global: EpochSet::empty(),
            }),
            notify: Notify::new(),
            root_sink: RwLock::new(None),
        }))
    }

    pub(crate) fn entry_point_handle(&self) -> &EntryPointHandle {
        &self.0.entry_point
    }

    pub(crate) fn is(&self, other: &DirNode) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) async fn clear_parent(&self) {
        *self.0.parent.write().await = None;
    }

    pub(crate) async fn current_blob_name_and_key(&self) -> (String, String) {
        let s = self.0.state.read().await;
        (s.blob_name.clone(), s.key.clone())
    }

    pub(crate) async fn set_root_sink(&self, sink: Arc<dyn RootPersistence>) {
        *self.0.root_sink.write().await = Some(sink);
    }

    /// Mints a real (empty-listing) blob for a never-saved directory, so it
    /// has a name a parent directory's listing can reference. A no-op once
    /// the directory has been saved at least once. Bypasses the deferred
    /// save state machine — this only ever runs on a freshly forked,
    /// entry-less directory, before it's reachable from any parent.
    pub(crate) async fn ensure_initial_blob(&self) -> NodeGraphResult<()> {
        let needs_save = self.0.state.read().await.blob_name.is_empty();
        if !needs_save {
            return Ok(());
        }
        let (snapshot, entry_point) = {
            let state = self.0.state.read().await;
            (state.entries.clone(), self.0.entry_point.clone())
        };
        let listing = Self::build_listing(&snapshot)?;
        let bytes = dircodec::encode(&listing);
        let (name, key) = vaultree_blobcrypt::save(
            &entry_point.datastore,
            entry_point.key_gen.as_ref(),
            Box::pin(std::io::Cursor::new(bytes)),
        )
        .await?;
        let mut state = self.0.state.write().await;
        if state.blob_name.is_empty() {
            state.blob_name = name.to_string();
            state.key = key;
        }
        Ok(())
    }

    /// Loads this directory's listing if it hasn't been already, sharing
    /// one in-flight load across every concurrent caller.
    async fn ensure_loaded(&self) -> NodeGraphResult<()> {
        loop {
            let (blob_name, key) = {
                let mut state = self.0.state.write().await;
                match state.phase {
                    Phase::Idle | Phase::Saving | Phase::SaveRequested => return Ok(()),
                    Phase::LoadError => {
                        return Err(state.load_error.clone().unwrap_or(NodeGraphError::LoadFailed(
                            "directory previously failed to load".to_string(),
                        )));
                    }
                    Phase::Loading => {
                        // Register interest before releasing the lock so a
                        // concurrent load-completion can't notify between
                        // our check and our wait. `notified()` only enqueues
                        // the waiter on first poll (or `enable()`), so it
                        // must be pinned and enabled while we still hold the
                        // state lock, or a `notify_waiters()` firing between
                        // here and the `.await` is lost forever.
                        let notified = self.0.notify.notified();
                        tokio::pin!(notified);
                        notified.as_mut().enable();
                        drop(state);
                        notified.await;
                        continue;
                    }
                    Phase::Unloaded => {
                        state.phase = Phase::Loading;
                        (state.blob_name.clone(), state.key.clone())
                    }
                }
            };

            let result = self.run_load(&blob_name, &key).await;
            let mut state = self.0.state.write().await;
            match result {
                Ok(entries) => {
                    state.entries = entries;
                    state.phase = Phase::Idle;
                    state.load_error = None;
                }
                Err(e) => {
                    state.phase = Phase::LoadError;
                    state.load_error = Some(e);
                }
            }
            drop(state);
            self.0.notify.notify_waiters();
            return self.ensure_loaded_outcome().await;
        }
    }

    async fn ensure_loaded_outcome(&self) -> NodeGraphResult<()> {
        let state = self.0.state.read().await;
        match state.phase {
            Phase::LoadError => Err(state
                .load_error
                .clone()
                .unwrap_or(NodeGraphError::LoadFailed("directory failed to load".to_string()))),
            _ => Ok(()),
        }
    }

    async fn run_load(&self, blob_name: &str, key: &str) -> NodeGraphResult<HashMap<String, Entry>> {
        let name = BlobName::from_string(blob_name).map_err(|e| NodeGraphError::LoadFailed(e.to_string()))?;
        let mut reader = vaultree_blobcrypt::open(&self.0.entry_point.datastore, &name, key).await?;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await?;
        let listing = dircodec::decode(&bytes)?;
        self.entries_from_listing(listing)
    }

    fn entries_from_listing(&self, listing: Listing) -> NodeGraphResult<HashMap<String, Entry>> {
        let mut map = HashMap::with_capacity(listing.entries.len());
        for e in listing.entries {
            let child_name =
                BlobName::from_bytes(e.child_blob_name).map_err(|err| NodeGraphError::LoadFailed(err.to_string()))?;
            let blob_name_text = child_name.to_string();
            let key_text = bs58::encode(&e.child_key).into_string();

            let node = match e.node_type {
                dircodec::NodeType::Dir => Node::Dir(DirNode::new(
                    self.0.entry_point.clone(),
                    blob_name_text.clone(),
                    key_text.clone(),
                    Some(Node::Dir(self.clone())),
                )),
                dircodec::NodeType::File => Node::File(crate::file::FileNode::new(
                    self.0.entry_point.clone(),
                    blob_name_text.clone(),
                    key_text.clone(),
                    Some(Node::Dir(self.clone())),
                )),
            };

            map.insert(
                e.name,
                Entry {
                    node,
                    child_blob_name: blob_name_text,
                    child_key: key_text,
                    metadata: MetadataMap::from_dircodec(e.metadata),
                    unsaved_epoch_set: EpochSet::empty(),
                },
            );
        }
        Ok(map)
    }

    fn build_listing(entries: &HashMap<String, Entry>) -> NodeGraphResult<Listing> {
        let mut out = Vec::with_capacity(entries.len());
        for (name, entry) in entries {
            let blob_name = BlobName::from_string(&entry.child_blob_name)
                .map_err(|e| NodeGraphError::LoadFailed(e.to_string()))?;
            let key_bytes = bs58::decode(&entry.child_key)
                .into_vec()
                .map_err(|e| NodeGraphError::LoadFailed(e.to_string()))?;
            let node_type = match &entry.node {
                Node::Dir(_) => dircodec::NodeType::Dir,
                Node::File(_) => dircodec::NodeType::File,
            };
            let mut wire_entry =
                dircodec::DirEntry::new(name.clone(), node_type, blob_name.as_bytes().to_vec(), key_bytes);
            wire_entry.metadata = entry.metadata.as_map().clone();
            out.push(wire_entry);
        }
        Ok(Listing { entries: out })
    }

    /// Looks up an entry by name, returning its node and metadata.
    pub async fn get_entry(&self, name: &str) -> NodeGraphResult<Option<(Node, MetadataMap)>> {
        self.ensure_loaded().await?;
        let state = self.0.state.read().await;
        Ok(state.entries.get(name).map(|e| (e.node.clone(), e.metadata.clone())))
    }

    /// Attaches `src` under `name`, cloning it first (see [`Node::fork`]) so
    /// the original is untouched by subsequent mutations through this
    /// directory. `src` is forked outside this directory's lock.
    pub async fn set_entry(&self, name: &str, src: &Node, metadata: MetadataMap) -> NodeGraphResult<()> {
        validate_entry_name(name)?;
        if !self.0.entry_point.same_entry_point(src.entry_point_handle()) {
            return Err(NodeGraphError::IncompatibleNode);
        }
        self.ensure_loaded().await?;

        let forked = src.fork(Node::Dir(self.clone())).await;
        forked.ensure_initial_blob().await?;
        let (blob_name, key) = forked.current_blob_name_and_key().await;

        {
            let mut state = self.0.state.write().await;
            state.entries.insert(
                name.to_string(),
                Entry {
                    node: forked,
                    child_blob_name: blob_name,
                    child_key: key,
                    metadata,
                    unsaved_epoch_set: EpochSet::empty(),
                },
            );
        }

        let epoch = self.0.entry_point.next_epoch();
        self.note_local_mutation(epoch).await;
        Ok(())
    }

    /// Removes `name`, returning whether it was present.
    pub async fn delete_entry(&self, name: &str) -> NodeGraphResult<bool> {
        self.ensure_loaded().await?;
        let removed = {
            let mut state = self.0.state.write().await;
            state.entries.remove(name)
        };
        let Some(entry) = removed else {
            return Ok(false);
        };
        entry.node.clear_parent().await;

        let epoch = self.0.entry_point.next_epoch();
        self.note_local_mutation(epoch).await;
        Ok(true)
    }

    /// A snapshot iterator over this directory's current entries.
    pub async fn entries(&self) -> NodeGraphResult<EntriesIterator> {
        self.ensure_loaded().await?;
        let state = self.0.state.read().await;
        let items = state
            .entries
            .iter()
            .map(|(name, e)| (name.clone(), e.node.clone(), e.metadata.clone()))
            .collect();
        Ok(EntriesIterator::new(items))
    }

    /// Waits until every mutation recorded before this call (anywhere in
    /// this subtree) has been durably saved.
    pub async fn sync(&self) -> NodeGraphResult<()> {
        self.ensure_loaded().await?;
        let snapshot = self.0.state.read().await.unsaved_global;
        loop {
            // Enable the waiter before reading `unsaved_global` so a
            // `notify_waiters()` fired between that read and the `.await`
            // below is still observed — `Notified` only joins the waiter
            // queue once pinned and enabled (or first polled), not merely
            // constructed.
            let notified = self.0.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let current = self.0.state.read().await.unsaved_global;
            if snapshot.disjoint_from(&current) {
                return Ok(());
            }
            notified.await;
        }
    }

    /// Records that this directory's own listing changed — directly (via
    /// `set_entry`/`delete_entry`) or because a child's completed save
    /// updated one of this directory's entries — arms the deferred save,
    /// and propagates the epoch up the ancestor chain.
    async fn note_local_mutation(&self, epoch: i64) {
        let should_spawn = {
            let mut state = self.0.state.write().await;
            state.unsaved_local.add(epoch);
            state.unsaved_global.add(epoch);
            match state.phase {
                Phase::Idle => {
                    state.phase = Phase::Saving;
                    true
                }
                Phase::Saving => {
                    state.phase = Phase::SaveRequested;
                    false
                }
                _ => false,
            }
        };
        self.0.notify.notify_waiters();
        if should_spawn {
            let this = self.clone();
            tokio::spawn(async move { this.run_save_loop().await });
        }
        let parent = self.0.parent.read().await.clone();
        propagate_epoch_to_ancestors(parent, epoch).await;
    }

    /// Called by a child once its own save completes: refreshes this
    /// directory's record of that child's pointer and outstanding epochs,
    /// and schedules this directory's own save so the change is persisted.
    /// A no-op if `child` is no longer one of this directory's entries.
    pub(crate) async fn persist_child_change(
        &self,
        child: &Node,
        new_blob_name: String,
        new_key: String,
        child_unsaved_global: EpochSet,
    ) {
        let found = {
            let mut state = self.0.state.write().await;
            match find_entry_name(&state.entries, child) {
                Some(name) => {
                    if let Some(entry) = state.entries.get_mut(&name) {
                        entry.child_blob_name = new_blob_name;
                        entry.child_key = new_key;
                        entry.unsaved_epoch_set = child_unsaved_global;
                    }
                    true
                }
                None => false,
            }
        };
        if !found {
            return;
        }
        let epoch = self.0.entry_point.next_epoch();
        self.note_local_mutation(epoch).await;
    }

    /// The save task body: spawned once on `Idle -> Saving`, loops as long
    /// as a mutation re-arms it to `SaveRequested` while it runs.
    async fn run_save_loop(self) {
        loop {
            let (snapshot, entry_point) = {
                let mut state = self.0.state.write().await;
                state.unsaved_local.clear();
                (state.entries.clone(), self.0.entry_point.clone())
            };

            let save_outcome = match Self::build_listing(&snapshot) {
                Ok(listing) => {
                    let bytes = dircodec::encode(&listing);
                    vaultree_blobcrypt::save(
                        &entry_point.datastore,
                        entry_point.key_gen.as_ref(),
                        Box::pin(std::io::Cursor::new(bytes)),
                    )
                    .await
                    .map_err(NodeGraphError::from)
                }
                Err(e) => Err(e),
            };

            let (blob_name_for_sink, key_for_sink, relaunch) = {
                let mut state = self.0.state.write().await;
                if let Ok((name, key)) = &save_outcome {
                    state.blob_name = name.to_string();
                    state.key = key.clone();
                }
                let mut recomputed = state.unsaved_local;
                for e in state.entries.values() {
                    recomputed.union(e.unsaved_epoch_set);
                }
                state.unsaved_global = recomputed;

                let relaunch = matches!(state.phase, Phase::SaveRequested);
                state.phase = if relaunch { Phase::Saving } else { Phase::Idle };
                (state.blob_name.clone(), state.key.clone(), relaunch)
            };
            self.0.notify.notify_waiters();

            match &save_outcome {
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "directory save failed; will retry on next mutation"),
            }

            if let Some(sink) = self.0.root_sink.read().await.clone() {
                if let Err(e) = sink.set(blob_name_for_sink.clone(), key_for_sink.clone()).await {
                    tracing::warn!(error = %e, "failed to persist root pointer");
                }
            }

            if save_outcome.is_ok() {
                let global = self.0.state.read().await.unsaved_global;
                let parent = self.0.parent.read().await.clone();
                if let Some(Node::Dir(p)) = parent {
                    p.persist_child_change(
                        &Node::Dir(self.clone()),
                        blob_name_for_sink,
                        key_for_sink,
                        global,
                    )
                    .await;
                }
            }

            if !relaunch {
                break;
            }
        }
    }
}

/// Widens every ancestor's `unsaved_global` with `epoch`, without touching
/// `unsaved_local` or the save state machine — those only change when the
/// ancestor's own listing actually changes, which happens later via
/// `persist_child_change` once the originating save completes. Iterative,
/// not recursive, to sidestep boxing an async-recursive future.
async fn propagate_epoch_to_ancestors(mut current: Option<Node>, epoch: i64) {
    while let Some(Node::Dir(dir)) = current {
        {
            let mut state = dir.0.state.write().await;
            state.unsaved_global.add(epoch);
        }
        dir.0.notify.notify_waiters();
        current = dir.0.parent.read().await.clone();
    }
}

fn find_entry_name(entries: &HashMap<String, Entry>, child: &Node) -> Option<String> {
    entries.iter().find(|(_, e)| e.node.ptr_eq(child)).map(|(k, _)| k.clone())
}

fn validate_entry_name(name: &str) -> NodeGraphResult<()> {
    if name.is_empty() {
        return Err(NodeGraphError::EmptyName);
    }
    if name.len() > dircodec::MAX_NAME {
        return Err(NodeGraphError::NameTooLong(name.len()));
    }
    Ok(())
}
