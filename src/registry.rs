//! Process-wide directory of config records keyed by their Rust type.
//!
//! The registry lets consumers subscribe to a config before it exists:
//! [`ConfigRegistry::on_init`] and [`ConfigRegistry::on_reload`] called for a
//! type that has not been registered yet park a promise or queue the
//! listener, and a later [`ConfigRegistry::register`] resolves and drains
//! them through the record's own init signal.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::codec::ConfigData;
use crate::error::Error;
use crate::promise::{InitHandle, Promise};
use crate::record::{ConfigRecord, Listener};
use crate::version::{self, VersionPolicy};

/// Type-erased record operations, for iteration in `reload_all`.
trait AnyRecord: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn reload_record(&self) -> Result<(), Error>;
    fn save_record(&self) -> Result<(), Error>;
}

impl<T: ConfigData> AnyRecord for ConfigRecord<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn reload_record(&self) -> Result<(), Error> {
        self.reload()
    }

    fn save_record(&self) -> Result<(), Error> {
        self.save()
    }
}

struct Inner {
    records: HashMap<TypeId, Arc<dyn AnyRecord>>,
    /// `Promise<Arc<T>>` per type, created by `on_init` before registration.
    pending_init: HashMap<TypeId, Box<dyn Any + Send>>,
    /// `Listener<T>` per type, queued by `on_reload` before registration.
    pending_reload: HashMap<TypeId, Vec<Box<dyn Any + Send>>>,
}

/// A directory of [`ConfigRecord`]s, one per logical config type.
///
/// The host constructs one and shares it; per-record operations take only
/// that record's own guard, while [`reload_all`](Self::reload_all) is
/// additionally serialized against itself by a registry-wide lock.
pub struct ConfigRegistry {
    inner: Mutex<Inner>,
    /// Serializes `reload_all` against other `reload_all` calls only.
    reload_all_lock: Mutex<()>,
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: HashMap::new(),
                pending_init: HashMap::new(),
                pending_reload: HashMap::new(),
            }),
            reload_all_lock: Mutex::new(()),
        }
    }

    /// Stores `record` under its type, overwriting any prior record.
    ///
    /// Double registration is a caller error: listeners attached to the
    /// replaced record stay with it and are not carried over. Through the
    /// record's init continuation (delivered on the record's executor when
    /// it has one), any pending init promise for the type is resolved and
    /// queued reload listeners are drained onto the record, FIFO.
    pub fn register<T: ConfigData>(&self, record: Arc<ConfigRecord<T>>) {
        let (pending_init, pending_listeners) = {
            let mut inner = self.inner.lock();
            let init = inner.pending_init.remove(&TypeId::of::<T>());
            let listeners = inner
                .pending_reload
                .remove(&TypeId::of::<T>())
                .unwrap_or_default();
            inner.records.insert(TypeId::of::<T>(), record.clone());
            (init, listeners)
        };

        let drain_target = record.clone();
        let drain = move |instance: Arc<T>| {
            if let Some(promise) = pending_init {
                let promise = promise
                    .downcast::<Promise<Arc<T>>>()
                    .expect("pending init keyed by TypeId");
                promise.complete(instance);
            }
            for boxed in pending_listeners {
                let listener = boxed
                    .downcast::<Listener<T>>()
                    .expect("pending listeners keyed by TypeId");
                drain_target.attach(*listener);
            }
        };
        match record.executor() {
            Some(executor) => record.on_init().then_via(executor, drain),
            None => record.on_init().then(drain),
        }
    }

    pub fn is_registered<T: ConfigData>(&self) -> bool {
        self.inner.lock().records.contains_key(&TypeId::of::<T>())
    }

    /// A handle that completes with `T`'s instance once it is registered and
    /// initialized. If `T` is already registered this derives from the
    /// record's own init signal; otherwise it is resolved by a later
    /// [`register`](Self::register), with the instance that registration's
    /// init produced.
    pub fn on_init<T: ConfigData>(&self) -> InitHandle<Arc<T>> {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.records.get(&TypeId::of::<T>()) {
            return downcast_record::<T>(record).on_init();
        }
        inner
            .pending_init
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Promise::<Arc<T>>::new()))
            .downcast_ref::<Promise<Arc<T>>>()
            .expect("pending init keyed by TypeId")
            .handle()
    }

    /// Synchronous access to the active instance.
    /// Fails with [`Error::NotRegistered`] when `T` has no record yet.
    pub fn get<T: ConfigData>(&self) -> Result<Arc<T>, Error> {
        let inner = self.inner.lock();
        let record = inner
            .records
            .get(&TypeId::of::<T>())
            .ok_or(Error::NotRegistered(std::any::type_name::<T>()))?;
        Ok(downcast_record::<T>(record).get())
    }

    /// Delegates to the record's own `reload`; only that record's guard is
    /// held, so this may interleave with a running `reload_all` at the
    /// per-record level.
    pub fn reload<T: ConfigData>(&self) -> Result<(), Error> {
        self.record_ops::<T>()?.reload_record()
    }

    pub fn save<T: ConfigData>(&self) -> Result<(), Error> {
        self.record_ops::<T>()?.save_record()
    }

    /// Reloads every registered record sequentially. Two concurrent
    /// `reload_all` calls never interleave.
    pub fn reload_all(&self) -> Result<(), Error> {
        let _guard = self.reload_all_lock.lock();
        let records: Vec<Arc<dyn AnyRecord>> =
            self.inner.lock().records.values().cloned().collect();
        for record in records {
            record.reload_record()?;
        }
        Ok(())
    }

    /// Attaches a reload listener now if `T` is registered, otherwise queues
    /// it for draining at registration time.
    pub fn on_reload<T: ConfigData>(&self, listener: impl Fn(Arc<T>) + Send + Sync + 'static) {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.records.get(&TypeId::of::<T>()) {
            downcast_record::<T>(record).attach(Arc::new(listener));
        } else {
            inner
                .pending_reload
                .entry(TypeId::of::<T>())
                .or_default()
                .push(Box::new(Arc::new(listener) as Listener<T>));
        }
    }

    /// Replaces the process-wide default version policy. Set once at process
    /// start, before any record construction; existing records keep the
    /// policy they captured.
    pub fn set_default_version_policy(&self, policy: VersionPolicy) {
        version::set_default_policy(policy);
    }

    fn record_ops<T: ConfigData>(&self) -> Result<Arc<dyn AnyRecord>, Error> {
        self.inner
            .lock()
            .records
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or(Error::NotRegistered(std::any::type_name::<T>()))
    }
}

impl Default for ConfigRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn downcast_record<T: ConfigData>(record: &Arc<dyn AnyRecord>) -> &ConfigRecord<T> {
    record
        .as_any()
        .downcast_ref::<ConfigRecord<T>>()
        .expect("records keyed by TypeId")
}
