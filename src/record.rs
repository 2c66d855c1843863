//! A single config file: load, hash, reload, save, notify.

use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::codec::{self, CodecOptions, ConfigData};
use crate::error::Error;
use crate::pipeline::Pipeline;
use crate::promise::{Executor, InitHandle, Promise};
use crate::version::{self, VersionPolicy};

pub(crate) type Hash = [u8; 32];

pub(crate) fn hash_file(path: &Path) -> Result<Hash, Error> {
    let bytes = fs::read(path)?;
    Ok(Sha256::digest(&bytes).into())
}

pub(crate) type Listener<T> = Arc<dyn Fn(Arc<T>) + Send + Sync>;

/// Owns one config file.
///
/// Construction runs the migration pipeline synchronously, hashes the
/// resulting file, and resolves the init signal; it never partially
/// succeeds. [`get`](Self::get) is a lock-free load of the active instance.
/// `reload` and `save` are mutually exclusive through the record's own IO
/// guard, and the active instance is only swapped after the replacement is
/// fully constructed, so a concurrent `get` never observes half-applied
/// state.
///
/// The file is treated as owned by this process for the life of the program.
/// An external edit landing between a hash check and the following load can
/// be missed; this check-then-act gap is an accepted limitation, not a
/// defended invariant.
pub struct ConfigRecord<T: ConfigData> {
    dir: PathBuf,
    file: PathBuf,
    options: CodecOptions,
    target_version: Option<String>,
    backup_dir: String,
    extension: String,
    policy: VersionPolicy,
    executor: Option<Arc<dyn Executor>>,
    instance: ArcSwap<T>,
    /// File hash, doubling as the IO guard: `reload` and `save` hold it end
    /// to end so instance and hash only ever change together.
    hash: Mutex<Hash>,
    listeners: Mutex<Vec<Listener<T>>>,
    init: Promise<Arc<T>>,
}

impl<T: ConfigData> ConfigRecord<T> {
    /// Starts building a record for `<dir>/<name>.yml`. The directory must
    /// already exist.
    pub fn builder(dir: impl Into<PathBuf>, name: impl Into<String>) -> ConfigRecordBuilder<T> {
        ConfigRecordBuilder {
            dir: dir.into(),
            name: name.into(),
            options: CodecOptions::default(),
            target_version: None,
            backup_dir: "old".to_string(),
            extension: "yml".to_string(),
            policy: None,
            executor: None,
            _marker: PhantomData,
        }
    }

    /// The currently active instance. Never blocks.
    pub fn get(&self) -> Arc<T> {
        self.instance.load_full()
    }

    pub fn path(&self) -> &Path {
        &self.file
    }

    /// Re-checks the file and swaps in a fresh instance if its bytes changed.
    ///
    /// Under the IO guard: the content hash is recomputed; if unchanged this
    /// is a no-op, even when the version tag looks stale. On change the
    /// pipeline re-runs, the instance is swapped, and every reload listener
    /// is invoked synchronously with the new instance, in registration
    /// order. Failures surface to the caller and listeners are not invoked.
    pub fn reload(&self) -> Result<(), Error> {
        let instance = {
            let mut hash = self.hash.lock();
            let new_hash = hash_file(&self.file)?;
            if *hash == new_hash {
                debug!(file = %self.file.display(), "unchanged, skipping reload");
                return Ok(());
            }
            *hash = new_hash;
            let instance = Arc::new(self.pipeline().run::<T>(&self.file)?);
            self.instance.store(instance.clone());
            instance
        };
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener(instance.clone());
        }
        Ok(())
    }

    /// Persists the in-memory instance and refreshes the stored hash. Does
    /// not re-run the migration pipeline.
    pub fn save(&self) -> Result<(), Error> {
        let mut hash = self.hash.lock();
        codec::save(
            &self.file,
            &*self.instance.load_full(),
            &self.options,
            self.target_version.as_deref(),
        )?;
        *hash = hash_file(&self.file)?;
        Ok(())
    }

    /// Applies `f` to a copy of the current instance, swaps it in, and
    /// persists it, all under the IO guard. Reload listeners are not
    /// invoked; this is a local mutation, not a reload.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> Result<(), Error>
    where
        T: Clone,
    {
        let mut hash = self.hash.lock();
        let mut value = (*self.instance.load_full()).clone();
        f(&mut value);
        let value = Arc::new(value);
        codec::save(
            &self.file,
            &*value,
            &self.options,
            self.target_version.as_deref(),
        )?;
        self.instance.store(value);
        *hash = hash_file(&self.file)?;
        Ok(())
    }

    /// Registers a reload listener. Listeners live as long as the record.
    pub fn on_reload(&self, listener: impl Fn(Arc<T>) + Send + Sync + 'static) {
        self.listeners.lock().push(Arc::new(listener));
    }

    pub(crate) fn attach(&self, listener: Listener<T>) {
        self.listeners.lock().push(listener);
    }

    /// Completes exactly once, with the instance produced at construction
    /// (not any later reload).
    pub fn on_init(&self) -> InitHandle<Arc<T>> {
        self.init.handle()
    }

    pub(crate) fn executor(&self) -> Option<Arc<dyn Executor>> {
        self.executor.clone()
    }

    fn pipeline(&self) -> Pipeline<'_> {
        Pipeline {
            dir: &self.dir,
            options: &self.options,
            target_version: self.target_version.as_deref(),
            backup_dir: &self.backup_dir,
            extension: &self.extension,
            policy: &self.policy,
        }
    }
}

pub struct ConfigRecordBuilder<T> {
    dir: PathBuf,
    name: String,
    options: CodecOptions,
    target_version: Option<String>,
    backup_dir: String,
    extension: String,
    policy: Option<VersionPolicy>,
    executor: Option<Arc<dyn Executor>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ConfigData> ConfigRecordBuilder<T> {
    pub fn options(mut self, options: CodecOptions) -> Self {
        self.options = options;
        self
    }

    /// Enables version checking against `version`. Without one, loads are
    /// plain merge-updates with no version logic at all.
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

    /// Overrides the process-wide default policy for this record.
    pub fn policy(mut self, policy: VersionPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Continuations on this record's init signal are handed to `executor`
    /// instead of running on the completing thread.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Runs the pipeline, hashes the file, and resolves the init signal.
    pub fn build(self) -> Result<Arc<ConfigRecord<T>>, Error> {
        let file = self.dir.join(format!("{}.{}", self.name, self.extension));
        let policy = self.policy.unwrap_or_else(version::default_policy);
        let instance = Arc::new(
            Pipeline {
                dir: &self.dir,
                options: &self.options,
                target_version: self.target_version.as_deref(),
                backup_dir: &self.backup_dir,
                extension: &self.extension,
                policy: &policy,
            }
            .run::<T>(&file)?,
        );
        let hash = hash_file(&file)?;
        let record = Arc::new(ConfigRecord {
            dir: self.dir,
            file,
            options: self.options,
            target_version: self.target_version,
            backup_dir: self.backup_dir,
            extension: self.extension,
            policy,
            executor: self.executor,
            instance: ArcSwap::new(instance.clone()),
            hash: Mutex::new(hash),
            listeners: Mutex::new(Vec::new()),
            init: Promise::new(),
        });
        record.init.complete(instance);
        Ok(record)
    }
}
