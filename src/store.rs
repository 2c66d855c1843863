//! Bulk store: a directory of files sharing one schema, keyed by a
//! caller-supplied identifier.
//!
//! Construction walks the directory recursively in file-name order, skipping
//! the backup subdirectory, and runs every recognized file through the same
//! migration pipeline a [`ConfigRecord`](crate::ConfigRecord) uses. Each
//! file is first parsed plainly for the exclusion filter, then migrated and
//! keyed by the identifier. A later file whose key collides with an earlier
//! one silently replaces it: last-scanned wins, deterministic under the
//! sorted walk. This load-time ordering hazard is preserved behavior, as is
//! [`save`](BulkConfigStore::save) being a silent no-op for unknown keys.
//!
//! ```no_run
//! use yamlcfg::{store, BulkConfigStore};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! #[serde(default)]
//! struct PlayerData {
//!     name: String,
//!     score: u32,
//! }
//!
//! # fn main() -> Result<(), yamlcfg::Error> {
//! let players: BulkConfigStore<String, PlayerData> =
//!     BulkConfigStore::builder("./players", store::identify::file_stem())
//!         .filter(store::filter::underscored())
//!         .target_version("1.0")
//!         .build()?;
//!
//! let alice = players.get(&"alice".to_string());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fs;
use std::hash::Hash as StdHash;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use walkdir::WalkDir;

use crate::codec::{self, CodecOptions, ConfigData};
use crate::error::{BoxedError, Error};
use crate::pipeline::Pipeline;
use crate::promise::{InitHandle, Promise};
use crate::version::{self, VersionPolicy};

/// Maps a file and its parsed instance to a lookup key. Errors propagate
/// wrapped with the offending file's path. Identifiers that are unstable
/// across reloads for unchanged files manifest as spurious "new" entries.
pub type IdentifyFn<K, T> = Arc<dyn Fn(&Path, &T) -> Result<K, BoxedError> + Send + Sync>;

/// Excludes files from a scan; `true` means skip entirely (not inserted, not
/// migrated).
pub type FilterFn<T> = Arc<dyn Fn(&Path, &T) -> Result<bool, BoxedError> + Send + Sync>;

/// An independent copy of the store's map.
pub type Snapshot<K, T> = HashMap<K, ConfigEntry<T>>;

/// One loaded config and the path it came from.
pub struct ConfigEntry<T> {
    data: Arc<T>,
    path: PathBuf,
}

impl<T> ConfigEntry<T> {
    pub fn data(&self) -> Arc<T> {
        self.data.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T> Clone for ConfigEntry<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            path: self.path.clone(),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ConfigEntry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigEntry")
            .field("data", &self.data)
            .field("path", &self.path)
            .finish()
    }
}

/// Manages many files of one schema under a directory.
pub struct BulkConfigStore<K, T: ConfigData> {
    dir: PathBuf,
    extension: String,
    options: CodecOptions,
    identifier: IdentifyFn<K, T>,
    filter: FilterFn<T>,
    target_version: Option<String>,
    backup_dir: String,
    policy: VersionPolicy,
    entries: Mutex<HashMap<K, ConfigEntry<T>>>,
    listeners: Mutex<Vec<Arc<dyn Fn(Snapshot<K, T>) + Send + Sync>>>,
    init: Promise<Snapshot<K, T>>,
}

impl<K, T> BulkConfigStore<K, T>
where
    K: Eq + StdHash + Clone + Send + Sync + 'static,
    T: ConfigData,
{
    /// Starts building a store over `dir`, keyed by `identifier`.
    pub fn builder(
        dir: impl Into<PathBuf>,
        identifier: IdentifyFn<K, T>,
    ) -> BulkConfigStoreBuilder<K, T> {
        BulkConfigStoreBuilder {
            dir: dir.into(),
            identifier,
            filter: filter::none(),
            options: CodecOptions::default(),
            target_version: None,
            backup_dir: "old".to_string(),
            extension: "yml".to_string(),
            policy: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Completes once, after the initial walk, with a snapshot of the map.
    pub fn on_init(&self) -> InitHandle<Snapshot<K, T>> {
        self.init.handle()
    }

    /// An independent copy of the map; mutating it never affects the store.
    pub fn snapshot(&self) -> Snapshot<K, T> {
        self.entries.lock().clone()
    }

    pub fn get(&self, key: &K) -> Option<Arc<T>> {
        self.entries.lock().get(key).map(|entry| entry.data.clone())
    }

    pub fn get_info(&self, key: &K) -> Option<ConfigEntry<T>> {
        self.entries.lock().get(key).cloned()
    }

    /// Collects every entry for which `predicate` holds. No ordering
    /// guarantee beyond the map's internal iteration order.
    pub fn get_where(&self, predicate: impl Fn(&ConfigEntry<T>) -> bool) -> Vec<Arc<T>> {
        self.entries
            .lock()
            .values()
            .filter(|entry| predicate(entry))
            .map(|entry| entry.data.clone())
            .collect()
    }

    /// Returns the existing entry for `key` unchanged, or materializes
    /// `<dir>/<base_name>.<ext>` with type defaults right away, inserts it,
    /// and returns it.
    pub fn create(&self, key: K, base_name: &str) -> Result<ConfigEntry<T>, Error> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&key) {
            return Ok(existing.clone());
        }
        let path = self.dir.join(format!("{}.{}", base_name, self.extension));
        let data: T = codec::update(&path, &self.options, self.target_version.as_deref())?;
        let entry = ConfigEntry {
            data: Arc::new(data),
            path,
        };
        entries.insert(key, entry.clone());
        Ok(entry)
    }

    /// Persists `data` to the key's known path and replaces the map entry.
    /// An unknown key is a silent no-op: nothing is written, the map is
    /// unchanged. Preserved behavior; callers wanting new entries use
    /// [`create`](Self::create).
    pub fn save(&self, key: &K, data: T) -> Result<(), Error> {
        let mut entries = self.entries.lock();
        let Some(existing) = entries.get(key) else {
            debug!(dir = %self.dir.display(), "save for unknown key ignored");
            return Ok(());
        };
        let path = existing.path.clone();
        codec::save(&path, &data, &self.options, self.target_version.as_deref())?;
        entries.insert(
            key.clone(),
            ConfigEntry {
                data: Arc::new(data),
                path,
            },
        );
        Ok(())
    }

    /// Clears the map and re-runs the full directory walk, then invokes
    /// every reload listener with a fresh snapshot, in registration order.
    ///
    /// Not incremental: cost is proportional to directory size on every
    /// call. A failure mid-walk aborts with the map cleared (possibly
    /// partially refilled) and the call is not recoverable; retry at a
    /// higher level.
    pub fn reload(&self) -> Result<(), Error> {
        let snapshot = {
            let mut entries = self.entries.lock();
            entries.clear();
            self.scan(&mut entries)?;
            entries.clone()
        };
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener(snapshot.clone());
        }
        Ok(())
    }

    /// Registers a listener invoked with a fresh snapshot after each reload.
    pub fn on_reload(&self, listener: impl Fn(Snapshot<K, T>) + Send + Sync + 'static) {
        self.listeners.lock().push(Arc::new(listener));
    }

    /// Recursive walk in file-name order; the backup subdirectory is skipped
    /// wholesale (name compared case-insensitively).
    fn scan(&self, entries: &mut HashMap<K, ConfigEntry<T>>) -> Result<(), Error> {
        let walker = WalkDir::new(&self.dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                !(entry.depth() > 0
                    && entry.file_type().is_dir()
                    && entry
                        .file_name()
                        .to_string_lossy()
                        .eq_ignore_ascii_case(&self.backup_dir))
            });
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            self.load_single(path, entries)?;
        }
        Ok(())
    }

    fn load_single(&self, path: &Path, entries: &mut HashMap<K, ConfigEntry<T>>) -> Result<(), Error> {
        // Plain parse first, purely for filter evaluation.
        let provisional: T = codec::peek(path)?;
        let excluded = (self.filter)(path, &provisional).map_err(|source| Error::Callback {
            path: path.to_path_buf(),
            source,
        })?;
        if excluded {
            debug!(file = %path.display(), "excluded by filter");
            return Ok(());
        }
        let data: T = Pipeline {
            dir: &self.dir,
            options: &self.options,
            target_version: self.target_version.as_deref(),
            backup_dir: &self.backup_dir,
            extension: &self.extension,
            policy: &self.policy,
        }
        .run(path)?;
        let key = (self.identifier)(path, &data).map_err(|source| Error::Callback {
            path: path.to_path_buf(),
            source,
        })?;
        // Colliding keys: last-scanned wins, without detection or warning.
        entries.insert(
            key,
            ConfigEntry {
                data: Arc::new(data),
                path: path.to_path_buf(),
            },
        );
        Ok(())
    }
}

pub struct BulkConfigStoreBuilder<K, T> {
    dir: PathBuf,
    identifier: IdentifyFn<K, T>,
    filter: FilterFn<T>,
    options: CodecOptions,
    target_version: Option<String>,
    backup_dir: String,
    extension: String,
    policy: Option<VersionPolicy>,
}

impl<K, T> BulkConfigStoreBuilder<K, T>
where
    K: Eq + StdHash + Clone + Send + Sync + 'static,
    T: ConfigData,
{
    /// Excludes files for which the filter returns `true`.
    pub fn filter(mut self, filter: FilterFn<T>) -> Self {
        self.filter = filter;
        self
    }

    pub fn options(mut self, options: CodecOptions) -> Self {
        self.options = options;
        self
    }

    /// Enables version checking and migration against `version`.
    pub fn target_version(mut self, version: impl Into<String>) -> Self {
        self.target_version = Some(version.into());
        self
    }

    pub fn backup_dir(mut self, name: impl Into<String>) -> Self {
        self.backup_dir = name.into();
        self
    }

    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Overrides the process-wide default policy for this store.
    pub fn policy(mut self, policy: VersionPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Creates the directory if missing, performs the initial walk, and
    /// resolves the init signal with a snapshot of the result.
    pub fn build(self) -> Result<BulkConfigStore<K, T>, Error> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
        }
        let store = BulkConfigStore {
            dir: self.dir,
            extension: self.extension,
            options: self.options,
            identifier: self.identifier,
            filter: self.filter,
            target_version: self.target_version,
            backup_dir: self.backup_dir,
            policy: self.policy.unwrap_or_else(version::default_policy),
            entries: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            init: Promise::new(),
        };
        {
            let mut entries = store.entries.lock();
            store.scan(&mut entries)?;
        }
        store.init.complete(store.snapshot());
        Ok(store)
    }
}

/// Stock identifiers.
pub mod identify {
    use std::path::Path;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use uuid::Uuid;

    use super::IdentifyFn;

    /// File name without extension as the key.
    pub fn file_stem<T>() -> IdentifyFn<String, T> {
        Arc::new(|path: &Path, _: &T| {
            Ok(path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default())
        })
    }

    /// Parses the file name (without extension) as a UUID.
    pub fn file_stem_uuid<T>() -> IdentifyFn<Uuid, T> {
        Arc::new(|path: &Path, _: &T| {
            let stem = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(Uuid::parse_str(&stem)?)
        })
    }

    /// Auto-incrementing keys drawn from `counter`. Unstable across reloads
    /// by construction; downstream consumers see every reload as all-new
    /// entries.
    pub fn sequential<T>(counter: Arc<AtomicU64>) -> IdentifyFn<u64, T> {
        Arc::new(move |_: &Path, _: &T| Ok(counter.fetch_add(1, Ordering::Relaxed)))
    }
}

/// Stock filters.
pub mod filter {
    use std::path::Path;
    use std::sync::Arc;

    use super::FilterFn;

    /// Loads everything.
    pub fn none<T>() -> FilterFn<T> {
        Arc::new(|_: &Path, _: &T| Ok(false))
    }

    /// Excludes files whose stem is wrapped in underscores, e.g. `_draft_.yml`.
    pub fn underscored<T>() -> FilterFn<T> {
        Arc::new(|path: &Path, _: &T| {
            let stem = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(stem.starts_with('_') && stem.ends_with('_'))
        })
    }
}
