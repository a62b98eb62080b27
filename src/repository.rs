//! The public repository façade (C8): every operation a caller sees,
//! dispatched onto a blocking worker while enforcing §5's lock discipline.
//!
//! Actual I/O is synchronous (§5: "all actual I/O is synchronous within a
//! worker"); `async fn` here only describes the suspension point a caller
//! awaits — the body runs on `tokio`'s blocking pool via
//! [`tokio::task::spawn_blocking`], the same bridge `line-centraldogma-rs`
//! uses to front a blocking client with an async surface.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use cd_core::{
    differ, staging, Change, Commit, CommitEnvelope, DiffChange, DiffChangeKind, EntityPath,
    EntityType, Entry, EntryContent, Markup, PathPattern, Revision,
};
use cd_git::{ObjectId, ObjectStore, RefName};

use crate::cache::ResultCache;
use crate::compaction::RollingStore;
use crate::config::RepositoryConfig;
use crate::error::CentralDogmaError;
use crate::watch::WatchMap;

const HEAD_REF: &str = "refs/heads/master";

/// How [`Repository::diff`]/[`Repository::preview_diff`] should render
/// modifications (§4.8).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiffMode {
    /// Modifications are left as plain content changes.
    Normal,
    /// Modifications are rendered as full upserts rather than patches.
    ///
    /// This core's [`DiffChange`] already carries content-addressed blob
    /// ids rather than a serialized patch, so the two modes coincide here;
    /// a caller that needs an actual RFC-6902 patch body renders one from
    /// the old/new blob content, a concern this façade deliberately leaves
    /// to its caller.
    PatchToUpsert,
}

/// Options controlling [`Repository::find`].
#[derive(Clone, Copy, Debug)]
pub struct FindOptions {
    /// If `false`, entries are returned with [`EntryContent::None`] — useful
    /// for existence checks without paying for blob reads.
    pub fetch_content: bool,
    /// Caps the number of entries returned; falls back to the repository's
    /// configured `find.max_entries` when `None`.
    pub max_entries: Option<u32>,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            fetch_content: true,
            max_entries: None,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Find {
        revision: u64,
        pattern: String,
        fetch_content: bool,
    },
    History {
        from: u64,
        to: u64,
        pattern: String,
        max: u32,
    },
    Diff {
        from: u64,
        to: u64,
        pattern: String,
    },
    LatestRevision {
        last_known: u64,
        pattern: String,
    },
}

#[derive(Clone)]
enum CachedValue {
    Find(BTreeMap<String, Entry>),
    History(Vec<Commit>),
    Diff(BTreeMap<String, DiffChange>),
    LatestRevision(Option<u64>),
}

struct Inner {
    rolling: RwLock<RollingStore>,
    head_ref: RefName,
    cache: ResultCache<CacheKey, CachedValue>,
    watches: Arc<WatchMap>,
    config: RepositoryConfig,
    gc_lock: Mutex<()>,
    closed: AtomicBool,
}

/// A handle to one repository's versioned content store.
///
/// Cheap to clone (internally an `Arc`); every clone shares the same lock,
/// cache, and watch map.
#[derive(Clone)]
pub struct Repository {
    inner: Arc<Inner>,
}

impl Repository {
    /// Open (or initialize) the repository rooted at `root`, bootstrapping
    /// the initial empty commit if this is a fresh repository.
    ///
    /// # Errors
    /// Propagates any I/O or object-store failure.
    pub fn open(root: &Path, root_name: &str, config: RepositoryConfig) -> Result<Self, CentralDogmaError> {
        let mut rolling = RollingStore::open(root, root_name, config.rolling.commit_threshold)?;
        let head_ref = RefName::new(HEAD_REF).expect("HEAD_REF is a valid literal ref name");

        if rolling.head_revision() == 0 {
            let (store, index) = rolling.primary_parts_mut();
            let base_tree = store.write_empty_tree()?;
            let meta = staging::CommitMeta {
                author: "centraldogma <centraldogma@localhost>".to_owned(),
                timestamp_ms: 0,
                summary: "Create a new repository".to_owned(),
                detail: String::new(),
                markup: Markup::Plaintext,
            };
            staging::commit(store, index, &head_ref, 0, ObjectId::ZERO, base_tree, &[], meta, true)?;
            tracing::info!(root_name, "initialized new repository");
        }

        Ok(Self {
            inner: Arc::new(Inner {
                rolling: RwLock::new(rolling),
                head_ref,
                cache: ResultCache::new(config.cache.max_weight),
                watches: Arc::new(WatchMap::new(config.watch.capacity_per_pattern)),
                config,
                gc_lock: Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    async fn run<F, T>(&self, f: F) -> Result<T, CentralDogmaError>
    where
        F: FnOnce(&Inner) -> Result<T, CentralDogmaError> + Send + 'static,
        T: Send + 'static,
    {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(CentralDogmaError::ShuttingDown);
        }
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|_| CentralDogmaError::ShuttingDown)?
    }

    /// Resolve `revision` against the current head (§3).
    ///
    /// # Errors
    /// Returns [`CentralDogmaError::RevisionNotFound`] if normalization puts
    /// it outside `[1, head]`.
    pub async fn normalize(&self, revision: Revision) -> Result<u64, CentralDogmaError> {
        self.run(move |inner| inner.normalize(revision)).await
    }

    /// Return every entry matching `pattern` at `revision`.
    ///
    /// # Errors
    /// Propagates any object-store or pattern-compile failure. Does not
    /// error on an out-of-range positive revision (returns an empty map
    /// instead, per this operation's contract).
    pub async fn find(
        &self,
        revision: Revision,
        pattern: &str,
        opts: FindOptions,
    ) -> Result<BTreeMap<String, Entry>, CentralDogmaError> {
        let pattern = pattern.to_owned();
        self.run(move |inner| inner.find(revision, &pattern, opts)).await
    }

    /// Convenience over [`Self::find`] for a single identity path.
    ///
    /// JSON-path query expressions are not evaluated by this core — `query`
    /// is always treated as a literal entity path.
    ///
    /// # Errors
    /// Propagates any error from the underlying `find`.
    pub async fn get(&self, revision: Revision, query: &str) -> Result<Option<Entry>, CentralDogmaError> {
        let query = query.to_owned();
        self.run(move |inner| {
            let mut map = inner.find(
                revision,
                &query,
                FindOptions {
                    fetch_content: true,
                    max_entries: Some(1),
                },
            )?;
            Ok(map.remove(&query))
        })
        .await
    }

    /// Commits touching `pattern` in `(min(from,to), max(from,to)]`, ordered
    /// descending if `from >= to` and ascending otherwise, capped at `max`.
    ///
    /// # Errors
    /// Propagates any revision-resolution or object-store failure.
    pub async fn history(
        &self,
        from: Revision,
        to: Revision,
        pattern: &str,
        max: u32,
    ) -> Result<Vec<Commit>, CentralDogmaError> {
        let pattern = pattern.to_owned();
        self.run(move |inner| inner.history(from, to, &pattern, max)).await
    }

    /// Pair-diff the trees at `from` and `to`, filtered by `pattern`.
    ///
    /// # Errors
    /// Propagates any revision-resolution or object-store failure.
    pub async fn diff(
        &self,
        from: Revision,
        to: Revision,
        pattern: &str,
        mode: DiffMode,
    ) -> Result<BTreeMap<String, DiffChange>, CentralDogmaError> {
        let pattern = pattern.to_owned();
        self.run(move |inner| inner.diff(from, to, &pattern, mode)).await
    }

    /// Run the staging step of a commit against `base` without persisting
    /// anything.
    ///
    /// # Errors
    /// Propagates any staging or revision-resolution failure.
    pub async fn preview_diff(
        &self,
        base: Revision,
        changes: Vec<Change>,
    ) -> Result<BTreeMap<String, DiffChange>, CentralDogmaError> {
        self.run(move |inner| inner.preview_diff(base, &changes)).await
    }

    /// Commit `changes` against `base`. If `direct` is `true`, the change
    /// list is first normalized through a preview-diff so that repeating
    /// the same direct push twice is idempotent (the second attempt sees a
    /// redundant change list).
    ///
    /// # Errors
    /// Returns [`CentralDogmaError::ReadOnly`] if the repository is
    /// read-only, [`CentralDogmaError::RedundantChange`] if the (possibly
    /// normalized) change list produces no net edits, or propagates any
    /// staging/object-store failure.
    #[allow(clippy::too_many_arguments)]
    pub async fn commit(
        &self,
        base: Revision,
        author: String,
        timestamp_ms: i64,
        summary: String,
        detail: String,
        markup: Markup,
        changes: Vec<Change>,
        direct: bool,
    ) -> Result<u64, CentralDogmaError> {
        self.run(move |inner| {
            inner.commit(base, author, timestamp_ms, summary, detail, markup, changes, direct)
        })
        .await
    }

    /// Commit the result of applying `transformer` to the JSON entry at
    /// `path`, relative to `base`.
    ///
    /// # Errors
    /// Same as [`Self::commit`].
    #[allow(clippy::too_many_arguments)]
    pub async fn commit_with_transform(
        &self,
        base: Revision,
        author: String,
        timestamp_ms: i64,
        summary: String,
        detail: String,
        markup: Markup,
        path: String,
        transformer: impl FnOnce(serde_json::Value) -> serde_json::Value + Send + 'static,
    ) -> Result<u64, CentralDogmaError> {
        self.run(move |inner| {
            let entity_path = EntityPath::new(path)?;
            let tree = inner.tree_at(inner.normalize(base)?)?;
            let current = {
                let rolling = inner.rolling.read().unwrap_or_else(PoisonError::into_inner);
                let store = rolling.primary_object_store();
                let entries = differ::snapshot(store, tree, None)?;
                entries
                    .into_iter()
                    .find(|e| e.path == entity_path.tree_path())
                    .and_then(|e| e.blob_id)
                    .map(|id| store.read_blob(id))
                    .transpose()?
                    .map(|bytes| serde_json::from_slice(&bytes))
                    .transpose()
                    .map_err(|e: serde_json::Error| CentralDogmaError::StorageCorruption {
                        reason: e.to_string(),
                    })?
                    .unwrap_or(serde_json::Value::Null)
            };
            let new_value = transformer(current);
            inner.commit(
                base,
                author,
                timestamp_ms,
                summary,
                detail,
                markup,
                vec![Change::UpsertJson {
                    path: entity_path,
                    json: new_value,
                }],
                true,
            )
        })
        .await
    }

    /// If a commit in `(last_known, head]` touched `pattern`, return the
    /// head revision; otherwise `None`.
    ///
    /// # Errors
    /// Returns [`CentralDogmaError::EntryNotFound`] if `error_if_missing` is
    /// `true` and `pattern` matches nothing at head.
    pub async fn find_latest_revision(
        &self,
        last_known: u64,
        pattern: &str,
        error_if_missing: bool,
    ) -> Result<Option<u64>, CentralDogmaError> {
        let pattern = pattern.to_owned();
        self.run(move |inner| inner.find_latest_revision(last_known, &pattern, error_if_missing))
            .await
    }

    /// Wait for the next commit (at or after `last_known`) touching
    /// `pattern`, returning its revision.
    ///
    /// # Errors
    /// Returns [`CentralDogmaError::EntryNotFound`] if `error_if_missing` is
    /// `true` and nothing currently matches, or
    /// [`CentralDogmaError::ShuttingDown`] if the repository closes while
    /// waiting.
    pub async fn watch(
        &self,
        last_known: u64,
        pattern: &str,
        error_if_missing: bool,
    ) -> Result<u64, CentralDogmaError> {
        if let Some(rev) = self
            .find_latest_revision(last_known, pattern, error_if_missing)
            .await?
        {
            return Ok(rev);
        }
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(CentralDogmaError::ShuttingDown);
        }
        let (_handle, rx) = self.inner.watches.add_once(last_known, pattern)?;
        rx.await.map_err(|_| CentralDogmaError::ShuttingDown)?
    }

    /// Drain resources: fail every pending watch, clear the cache, and
    /// reject all further operations.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.watches.close(|| CentralDogmaError::ShuttingDown);
        self.inner.cache.clear();
    }
}

impl Inner {
    fn head_revision(&self) -> u64 {
        self.rolling
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .head_revision()
    }

    fn normalize(&self, revision: Revision) -> Result<u64, CentralDogmaError> {
        revision
            .normalize(self.head_revision())
            .ok_or(CentralDogmaError::RevisionNotFound {
                requested: revision.raw(),
                first_retained: None,
            })
    }

    /// Like [`Self::normalize`], but a positive revision beyond head yields
    /// `Ok(None)` rather than an error, matching `find`'s documented
    /// contract ("If rev > head, returns empty").
    fn normalize_for_find(&self, revision: Revision) -> Result<Option<u64>, CentralDogmaError> {
        let head = self.head_revision();
        if let Some(abs) = revision.normalize(head) {
            return Ok(Some(abs));
        }
        if revision.raw() > 0 {
            return Ok(None);
        }
        Err(CentralDogmaError::RevisionNotFound {
            requested: revision.raw(),
            first_retained: None,
        })
    }

    fn tree_at(&self, revision: u64) -> Result<ObjectId, CentralDogmaError> {
        let rolling = self.rolling.read().unwrap_or_else(PoisonError::into_inner);
        let commit_id = rolling.get_commit_id(revision)?;
        Ok(rolling.primary_object_store().read_commit(commit_id)?.tree_id)
    }

    fn find(
        &self,
        revision: Revision,
        pattern: &str,
        opts: FindOptions,
    ) -> Result<BTreeMap<String, Entry>, CentralDogmaError> {
        let Some(abs) = self.normalize_for_find(revision)? else {
            return Ok(BTreeMap::new());
        };

        let key = CacheKey::Find {
            revision: abs,
            pattern: pattern.to_owned(),
            fetch_content: opts.fetch_content,
        };
        let max_entries = opts.max_entries.unwrap_or(self.config.find.max_entries);

        let value = self.cache.load(key, || -> Result<_, CentralDogmaError> {
            let map = self.find_uncached(abs, pattern, opts.fetch_content)?;
            let weight = u64::from(u32::try_from(map.len()).unwrap_or(u32::MAX));
            Ok((CachedValue::Find(map), weight))
        })?;

        let CachedValue::Find(mut map) = value else {
            unreachable!("Find cache key always produces CachedValue::Find")
        };
        if map.len() as u64 > u64::from(max_entries) {
            map = map
                .into_iter()
                .take(max_entries as usize)
                .collect();
        }
        Ok(map)
    }

    fn find_uncached(
        &self,
        revision: u64,
        pattern: &str,
        fetch_content: bool,
    ) -> Result<BTreeMap<String, Entry>, CentralDogmaError> {
        if pattern == EntityPath::ROOT {
            let mut map = BTreeMap::new();
            map.insert(
                EntityPath::ROOT.to_owned(),
                Entry {
                    revision,
                    path: EntityPath::new(EntityPath::ROOT)?,
                    entry_type: EntityType::Directory,
                    content: EntryContent::None,
                },
            );
            return Ok(map);
        }

        let tree = self.tree_at(revision)?;
        let rolling = self.rolling.read().unwrap_or_else(PoisonError::into_inner);
        let store = rolling.primary_object_store();
        let compiled = PathPattern::new(pattern)?;
        let entries = differ::snapshot(store, tree, Some(&compiled))?;

        let mut out = BTreeMap::new();
        for entry in entries {
            let full_path = format!("/{}", entry.path);
            let Some(blob_id) = entry.blob_id else {
                out.insert(
                    full_path.clone(),
                    Entry {
                        revision,
                        path: EntityPath::new(full_path)?,
                        entry_type: EntityType::Directory,
                        content: EntryContent::None,
                    },
                );
                continue;
            };
            let is_json = entry.path.ends_with(".json");
            let content = if fetch_content {
                let bytes = store.read_blob(blob_id)?;
                if is_json {
                    EntryContent::Json(serde_json::from_slice(&bytes).map_err(|e| {
                        CentralDogmaError::StorageCorruption { reason: e.to_string() }
                    })?)
                } else {
                    EntryContent::Text(String::from_utf8(bytes).map_err(|e| {
                        CentralDogmaError::StorageCorruption { reason: e.to_string() }
                    })?)
                }
            } else {
                EntryContent::None
            };
            out.insert(
                full_path.clone(),
                Entry {
                    revision,
                    path: EntityPath::new(full_path)?,
                    entry_type: if is_json { EntityType::Json } else { EntityType::Text },
                    content,
                },
            );
        }
        Ok(out)
    }

    fn commit_record(&self, revision: u64) -> Result<(Commit, ObjectId), CentralDogmaError> {
        let rolling = self.rolling.read().unwrap_or_else(PoisonError::into_inner);
        let commit_id = rolling.get_commit_id(revision)?;
        let info = rolling.primary_object_store().read_commit(commit_id)?;
        let envelope = CommitEnvelope::from_message(&info.message)
            .map_err(|e| CentralDogmaError::StorageCorruption { reason: e.to_string() })?;
        let first = rolling.first_revision();
        Ok((
            Commit {
                revision,
                author: info.author,
                timestamp_ms: info.timestamp_ms,
                summary: envelope.summary,
                detail: envelope.detail,
                markup: envelope.markup,
                parent_revision: (revision > first).then_some(revision - 1),
            },
            info.tree_id,
        ))
    }

    fn diff(
        &self,
        from: Revision,
        to: Revision,
        pattern: &str,
        _mode: DiffMode,
    ) -> Result<BTreeMap<String, DiffChange>, CentralDogmaError> {
        let from_abs = self.normalize(from)?;
        let to_abs = self.normalize(to)?;

        let key = CacheKey::Diff {
            from: from_abs,
            to: to_abs,
            pattern: pattern.to_owned(),
        };
        let value = self.cache.load(key, || -> Result<_, CentralDogmaError> {
            let (_, from_tree) = self.commit_record(from_abs)?;
            let (_, to_tree) = self.commit_record(to_abs)?;
            let rolling = self.rolling.read().unwrap_or_else(PoisonError::into_inner);
            let store = rolling.primary_object_store();
            let compiled = PathPattern::new(pattern)?;
            let changes = differ::diff(store, Some(from_tree), to_tree, Some(&compiled))?;
            let weight = u64::from(u32::try_from(changes.len()).unwrap_or(u32::MAX));
            let map: BTreeMap<String, DiffChange> =
                changes.into_iter().map(|c| (format!("/{}", c.path), c)).collect();
            Ok((CachedValue::Diff(map), weight))
        })?;

        let CachedValue::Diff(map) = value else {
            unreachable!("Diff cache key always produces CachedValue::Diff")
        };
        Ok(map)
    }

    fn preview_diff(
        &self,
        base: Revision,
        changes: &[Change],
    ) -> Result<BTreeMap<String, DiffChange>, CentralDogmaError> {
        let base_abs = self.normalize(base)?;
        let base_tree = self.tree_at(base_abs)?;
        let rolling = self.rolling.read().unwrap_or_else(PoisonError::into_inner);
        let store = rolling.primary_object_store();
        let (new_tree, _) = staging::stage(store, base_tree, changes)?;
        let diffs = differ::diff(store, Some(base_tree), new_tree, None)?;
        Ok(diffs.into_iter().map(|c| (format!("/{}", c.path), c)).collect())
    }

    fn history(
        &self,
        from: Revision,
        to: Revision,
        pattern: &str,
        max: u32,
    ) -> Result<Vec<Commit>, CentralDogmaError> {
        let from_abs = self.normalize(from)?;
        let to_abs = self.normalize(to)?;

        let key = CacheKey::History {
            from: from_abs,
            to: to_abs,
            pattern: pattern.to_owned(),
            max,
        };
        let value = self.cache.load(key, || -> Result<_, CentralDogmaError> {
            let commits = self.history_uncached(from_abs, to_abs, pattern, max)?;
            let weight = u64::from(u32::try_from(commits.len()).unwrap_or(u32::MAX));
            Ok((CachedValue::History(commits), weight))
        })?;

        let CachedValue::History(commits) = value else {
            unreachable!("History cache key always produces CachedValue::History")
        };
        Ok(commits)
    }

    fn history_uncached(
        &self,
        from: u64,
        to: u64,
        pattern: &str,
        max: u32,
    ) -> Result<Vec<Commit>, CentralDogmaError> {
        let compiled = PathPattern::new(pattern)?;
        let descending = from >= to;
        let (lo, hi) = if from <= to { (from, to) } else { (to, from) };

        let mut revisions: Vec<u64> = (lo..=hi).collect();
        if descending {
            revisions.reverse();
        }

        let cap = max.min(self.config.history.max_commits) as usize;
        let mut out = Vec::new();
        for revision in revisions.drain(..) {
            if out.len() >= cap {
                break;
            }
            let first_revision = self.rolling.read().unwrap_or_else(PoisonError::into_inner).first_revision();
            // A compacted boundary has no reachable parent to diff against;
            // every other revision (including the true revision 1, whose
            // parent is the empty tree) goes through the diff gate below.
            if revision == first_revision && first_revision > 1 {
                out.push(self.commit_record(revision)?.0);
                continue;
            }
            let (commit, tree) = self.commit_record(revision)?;
            let parent_tree = if revision > first_revision {
                self.commit_record(revision - 1)?.1
            } else {
                let rolling = self.rolling.read().unwrap_or_else(PoisonError::into_inner);
                rolling.primary_object_store().write_empty_tree()?
            };
            let rolling = self.rolling.read().unwrap_or_else(PoisonError::into_inner);
            let store = rolling.primary_object_store();
            let touched = differ::diff(store, Some(parent_tree), tree, Some(&compiled))?;
            drop(rolling);
            if !touched.is_empty() || compiled.matches_all() {
                out.push(commit);
            }
        }
        Ok(out)
    }

    fn find_latest_revision(
        &self,
        last_known: u64,
        pattern: &str,
        error_if_missing: bool,
    ) -> Result<Option<u64>, CentralDogmaError> {
        let key = CacheKey::LatestRevision {
            last_known,
            pattern: pattern.to_owned(),
        };
        let value = self.cache.load(key, || -> Result<_, CentralDogmaError> {
            let result = self.find_latest_revision_uncached(last_known, pattern)?;
            Ok((CachedValue::LatestRevision(result), 1))
        })?;

        let CachedValue::LatestRevision(result) = value else {
            unreachable!("LatestRevision cache key always produces CachedValue::LatestRevision")
        };
        if result.is_none() && error_if_missing {
            let head = self.head_revision();
            let matches_at_head = !self.find_uncached(head, pattern, false)?.is_empty() || pattern == EntityPath::ROOT;
            if !matches_at_head {
                return Err(CentralDogmaError::EntryNotFound {
                    path: pattern.to_owned(),
                });
            }
        }
        Ok(result)
    }

    fn find_latest_revision_uncached(
        &self,
        last_known: u64,
        pattern: &str,
    ) -> Result<Option<u64>, CentralDogmaError> {
        let head = self.head_revision();
        if head == 0 || last_known >= head {
            return Ok(None);
        }
        let compiled = PathPattern::new(pattern)?;
        for revision in (last_known + 1)..=head {
            let (_, tree) = self.commit_record(revision)?;
            let parent_tree = if revision
                > self.rolling.read().unwrap_or_else(PoisonError::into_inner).first_revision()
            {
                self.commit_record(revision - 1)?.1
            } else {
                let rolling = self.rolling.read().unwrap_or_else(PoisonError::into_inner);
                rolling.primary_object_store().write_empty_tree()?
            };
            let rolling = self.rolling.read().unwrap_or_else(PoisonError::into_inner);
            let store = rolling.primary_object_store();
            let touched = differ::diff(store, Some(parent_tree), tree, Some(&compiled))?;
            if !touched.is_empty() {
                return Ok(Some(head));
            }
        }
        Ok(None)
    }

    #[allow(clippy::too_many_arguments)]
    fn commit(
        &self,
        base: Revision,
        author: String,
        timestamp_ms: i64,
        summary: String,
        detail: String,
        markup: Markup,
        changes: Vec<Change>,
        direct: bool,
    ) -> Result<u64, CentralDogmaError> {
        if self.config.read_only {
            return Err(CentralDogmaError::ReadOnly);
        }

        let _gc = self.gc_lock.try_lock().map_err(|_| CentralDogmaError::ChangeConflict {
            reason: "rolling compaction holds the gc lock".to_owned(),
        })?;

        let mut rolling = self.rolling.write().unwrap_or_else(PoisonError::into_inner);
        let base_abs = base
            .normalize(rolling.head_revision())
            .ok_or(CentralDogmaError::RevisionNotFound {
                requested: base.raw(),
                first_retained: None,
            })?;
        let base_commit_id = rolling.get_commit_id(base_abs)?;
        let base_tree = rolling.primary_object_store().read_commit(base_commit_id)?.tree_id;

        let changes = if direct {
            let (store, _) = rolling.primary_parts_mut();
            let (new_tree, _) = staging::stage(store, base_tree, &changes)?;
            let diffs = differ::diff(store, Some(base_tree), new_tree, None)?;
            materialize_changes(store, &diffs)?
        } else {
            changes
        };

        let meta = staging::CommitMeta {
            author,
            timestamp_ms,
            summary,
            detail,
            markup,
        };

        let (store, index) = rolling.primary_parts_mut();
        let outcome = staging::commit(
            store,
            index,
            &self.head_ref,
            base_abs,
            base_commit_id,
            base_tree,
            &changes,
            meta,
            false,
        )?;

        let message = format!("commit: revision {}", outcome.revision);
        if rolling.should_start_secondary() {
            rolling.start_secondary()?;
        } else {
            rolling.mirror_commit(outcome.revision, outcome.tree_id, &message, "centraldogma", timestamp_ms)?;
        }

        let changed_paths: Vec<String> = outcome.changes.iter().map(|c| c.path.clone()).collect();
        drop(rolling);
        self.watches.notify(outcome.revision, &changed_paths);

        Ok(outcome.revision)
    }
}

fn materialize_changes(store: &dyn ObjectStore, diffs: &[DiffChange]) -> Result<Vec<Change>, CentralDogmaError> {
    let mut out = Vec::with_capacity(diffs.len());
    for change in diffs {
        match change.kind {
            DiffChangeKind::Added | DiffChangeKind::Modified => {
                let id = change.new_id.expect("added/modified changes carry new_id");
                let bytes = store.read_blob(id)?;
                let path = EntityPath::new(format!("/{}", change.path))?;
                if change.path.ends_with(".json") {
                    let json = serde_json::from_slice(&bytes)
                        .map_err(|e| CentralDogmaError::StorageCorruption { reason: e.to_string() })?;
                    out.push(Change::UpsertJson { path, json });
                } else {
                    let text = String::from_utf8(bytes)
                        .map_err(|e| CentralDogmaError::StorageCorruption { reason: e.to_string() })?;
                    out.push(Change::UpsertText { path, text });
                }
            }
            DiffChangeKind::Removed => {
                out.push(Change::Remove {
                    path: EntityPath::new(format!("/{}", change.path))?,
                });
            }
            DiffChangeKind::Renamed => {
                let old_path = EntityPath::new(format!(
                    "/{}",
                    change.old_path.clone().expect("renamed changes carry old_path")
                ))?;
                let new_path = EntityPath::new(format!("/{}", change.path))?;
                out.push(Change::Rename { old_path, new_path });
            }
        }
    }
    Ok(out)
}
