//! The watch subsystem (C10): `pattern → set<Watch>`, notified in commit
//! order from the write path.

use std::collections::HashMap;
use std::sync::{Mutex, Weak};

use cd_core::PathPattern;
use tokio::sync::oneshot;

use crate::error::CentralDogmaError;

/// What a watch resolves to: the new head revision, or a terminal failure
/// (e.g. the repository closed while the watch was pending).
pub type NotifyResult = Result<u64, CentralDogmaError>;

enum Sink {
    /// A one-shot future awaiting the next matching revision.
    Once(oneshot::Sender<NotifyResult>),
    /// A persistent listener, re-armed by the caller after each delivery.
    Listener(Box<dyn Fn(NotifyResult) + Send + Sync>),
}

struct WatchEntry {
    id: u64,
    last_known_rev: u64,
    sink: Sink,
}

struct Bucket {
    pattern: PathPattern,
    entries: Vec<WatchEntry>,
}

struct State {
    buckets: HashMap<String, Bucket>,
    next_id: u64,
}

/// A bounded `pattern → set<Watch>` map. Guarded by its own mutex, acquired
/// briefly and never held during dispatch (§5).
pub struct WatchMap {
    state: Mutex<State>,
    capacity_per_pattern: u32,
}

/// A caller-held reference to a registered watch, used only to cancel it.
/// Holds a weak back-reference to the map so a watch never keeps the map
/// alive past `close` (§9).
pub struct WatchHandle {
    pattern: String,
    id: u64,
    map: Weak<WatchMap>,
}

impl WatchHandle {
    /// Remove this watch if it is still pending. No-op if it already fired
    /// or the map has been closed.
    pub fn cancel(&self) {
        if let Some(map) = self.map.upgrade() {
            map.remove(&self.pattern, self.id);
        }
    }
}

impl WatchMap {
    /// Create an empty watch map, bounding each pattern's watch set to
    /// `capacity_per_pattern` entries.
    #[must_use]
    pub fn new(capacity_per_pattern: u32) -> Self {
        Self {
            state: Mutex::new(State {
                buckets: HashMap::new(),
                next_id: 0,
            }),
            capacity_per_pattern,
        }
    }

    /// Register a one-shot watch, returning a handle and the receiver the
    /// caller awaits.
    ///
    /// # Errors
    /// Returns [`CentralDogmaError::ChangeConflict`] if `pattern` fails to
    /// compile.
    pub fn add_once(
        self: &std::sync::Arc<Self>,
        last_known_rev: u64,
        pattern: &str,
    ) -> Result<(WatchHandle, oneshot::Receiver<NotifyResult>), CentralDogmaError> {
        let (tx, rx) = oneshot::channel();
        let id = self.insert(pattern, last_known_rev, Sink::Once(tx))?;
        Ok((
            WatchHandle {
                pattern: pattern.to_owned(),
                id,
                map: std::sync::Arc::downgrade(self),
            },
            rx,
        ))
    }

    /// Register a persistent listener, called every time a matching commit
    /// lands (the caller is responsible for re-registering if it wants
    /// further notifications after the map drops this entry on delivery).
    ///
    /// # Errors
    /// Returns [`CentralDogmaError::ChangeConflict`] if `pattern` fails to
    /// compile.
    pub fn add_listener(
        self: &std::sync::Arc<Self>,
        last_known_rev: u64,
        pattern: &str,
        on_update: impl Fn(NotifyResult) + Send + Sync + 'static,
    ) -> Result<WatchHandle, CentralDogmaError> {
        let id = self.insert(pattern, last_known_rev, Sink::Listener(Box::new(on_update)))?;
        Ok(WatchHandle {
            pattern: pattern.to_owned(),
            id,
            map: std::sync::Arc::downgrade(self),
        })
    }

    fn insert(&self, pattern: &str, last_known_rev: u64, sink: Sink) -> Result<u64, CentralDogmaError> {
        let compiled = PathPattern::new(pattern).map_err(|err| CentralDogmaError::ChangeConflict {
            reason: err.to_string(),
        })?;

        let mut evicted = None;
        let id;
        {
            let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let bucket = state
                .buckets
                .entry(pattern.to_owned())
                .or_insert_with(|| Bucket {
                    pattern: compiled,
                    entries: Vec::new(),
                });

            if bucket.entries.len() as u32 >= self.capacity_per_pattern && !bucket.entries.is_empty() {
                evicted = Some(bucket.entries.remove(0));
            }

            id = state.next_id;
            state.next_id += 1;
            state
                .buckets
                .get_mut(pattern)
                .expect("bucket just inserted")
                .entries
                .push(WatchEntry {
                    id,
                    last_known_rev,
                    sink,
                });
        }

        if let Some(entry) = evicted {
            tracing::warn!(pattern, "watch evicted: per-pattern capacity exceeded");
            dispatch(entry, Err(CentralDogmaError::Timeout));
        }

        Ok(id)
    }

    fn remove(&self, pattern: &str, id: u64) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(bucket) = state.buckets.get_mut(pattern) {
            bucket.entries.retain(|e| e.id != id);
            if bucket.entries.is_empty() {
                state.buckets.remove(pattern);
            }
        }
    }

    /// Notify every watch whose pattern matches one of `changed_paths` and
    /// whose `last_known_rev` predates `new_rev`. Matching watches are
    /// removed from the map before dispatch, which always happens outside
    /// the map's lock to avoid callback reentrancy (§5).
    pub fn notify(&self, new_rev: u64, changed_paths: &[String]) {
        let mut to_fire = Vec::new();
        {
            let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let mut now_empty = Vec::new();
            for (key, bucket) in &mut state.buckets {
                let matches = changed_paths
                    .iter()
                    .any(|path| bucket.pattern.matches(&format!("/{}", path.trim_start_matches('/'))));
                if !matches {
                    continue;
                }
                let (fire, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut bucket.entries)
                    .into_iter()
                    .partition(|e| e.last_known_rev < new_rev);
                bucket.entries = keep;
                to_fire.extend(fire);
                if bucket.entries.is_empty() {
                    now_empty.push(key.clone());
                }
            }
            for key in now_empty {
                state.buckets.remove(&key);
            }
        }

        for entry in to_fire {
            dispatch(entry, Ok(new_rev));
        }
    }

    /// Fail every pending watch with an error built by `cause`, and drop the
    /// map's contents. Called by `Repository::close` (§9).
    pub fn close(&self, cause: impl Fn() -> CentralDogmaError) {
        let all: Vec<WatchEntry> = {
            let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            state.buckets.drain().flat_map(|(_, b)| b.entries).collect()
        };
        for entry in all {
            dispatch(entry, Err(cause()));
        }
    }

    /// Number of distinct patterns currently registered, for diagnostics.
    #[must_use]
    pub fn pattern_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .buckets
            .len()
    }
}

fn dispatch(entry: WatchEntry, result: NotifyResult) {
    match entry.sink {
        Sink::Once(tx) => {
            let _ = tx.send(result);
        }
        Sink::Listener(cb) => cb(result),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn does_not_fire_until_a_newer_revision_lands() {
        let map = Arc::new(WatchMap::new(16));
        let (_handle, mut rx) = map.add_once(2, "/**").unwrap();
        assert!(rx.try_recv().is_err());

        map.notify(3, &["a.json".to_owned()]);
        assert_eq!(rx.try_recv().unwrap().unwrap(), 3);
    }

    #[test]
    fn only_matching_pattern_fires() {
        let map = Arc::new(WatchMap::new(16));
        let (_handle, mut rx) = map.add_once(0, "/a/**").unwrap();

        map.notify(1, &["b/x.json".to_owned()]);
        assert!(rx.try_recv().is_err());

        map.notify(2, &["a/x.json".to_owned()]);
        assert_eq!(rx.try_recv().unwrap().unwrap(), 2);
    }

    #[test]
    fn cancel_removes_a_pending_watch() {
        let map = Arc::new(WatchMap::new(16));
        let (handle, mut rx) = map.add_once(0, "/**").unwrap();
        handle.cancel();
        map.notify(1, &["a.json".to_owned()]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn listener_is_reusable_across_notifications() {
        let map = Arc::new(WatchMap::new(16));
        let count = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&count);
        map.add_listener(0, "/**", move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        map.notify(1, &["a.json".to_owned()]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_fails_every_pending_watch() {
        let map = Arc::new(WatchMap::new(16));
        let (_handle, mut rx) = map.add_once(0, "/**").unwrap();
        map.close(|| CentralDogmaError::ShuttingDown);
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(CentralDogmaError::ShuttingDown)
        ));
    }

    #[test]
    fn empty_bucket_is_pruned_after_firing() {
        let map = Arc::new(WatchMap::new(16));
        let (_handle, _rx) = map.add_once(0, "/**").unwrap();
        assert_eq!(map.pattern_count(), 1);
        map.notify(1, &["a.json".to_owned()]);
        assert_eq!(map.pattern_count(), 0);
    }
}
